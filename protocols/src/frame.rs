// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

//! Serialization and deserialization of transaction frame.
//!
//! The module includes functions for frame of transaction defined by Echo Audio Digital
//! Corporation for Fireworks board module. The frame consists of 6 quadlets header followed by
//! parameter quadlets, aligned to big-endian order in the transferred packet.

use glib::{Error, FileError};

/// The size of quadlet, the atomic unit in the frame.
pub const QUADLET_SIZE: usize = 4;

/// The number of quadlets in header of frame; length, version, seqnum, category, command, and
/// status fields.
pub const HEADER_QUADLET_COUNT: usize = 6;

/// The maximum size of frame in both directions.
pub const MAX_FRAME_SIZE: usize = 0x200;

/// The maximum number of quadlets in frame.
pub const MAX_FRAME_QUADLET_COUNT: usize = MAX_FRAME_SIZE / QUADLET_SIZE;

/// The value of version field in any command frame.
pub const FRAME_VERSION: u32 = 1;

/// The content of frame for both command and response of transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFrame {
    /// The value of version field.
    pub version: u32,
    /// The sequence number to correlate command and response.
    pub seqnum: u32,
    /// The category of operation.
    pub category: u32,
    /// The command of operation in the category.
    pub command: u32,
    /// The status of operation. Zero in any command frame, set by the unit in response frame.
    pub status: u32,
    /// The parameters of operation.
    pub params: Vec<u32>,
}

impl Default for TransactionFrame {
    fn default() -> Self {
        Self {
            version: FRAME_VERSION,
            seqnum: 0,
            category: 0,
            command: 0,
            status: 0,
            params: Vec::new(),
        }
    }
}

/// Serialize the frame to the layout transferred by asynchronous block write transaction.
pub fn serialize_frame(frame: &TransactionFrame) -> Result<Vec<u8>, Error> {
    let count = HEADER_QUADLET_COUNT + frame.params.len();
    if count > MAX_FRAME_QUADLET_COUNT {
        let msg = format!("Frame should be less than {} quadlets: {}", MAX_FRAME_QUADLET_COUNT, count);
        Err(Error::new(FileError::Inval, &msg))?;
    }

    let mut raw = Vec::with_capacity(count * QUADLET_SIZE);
    raw.extend_from_slice(&(count as u32).to_be_bytes());
    raw.extend_from_slice(&frame.version.to_be_bytes());
    raw.extend_from_slice(&frame.seqnum.to_be_bytes());
    raw.extend_from_slice(&frame.category.to_be_bytes());
    raw.extend_from_slice(&frame.command.to_be_bytes());
    raw.extend_from_slice(&frame.status.to_be_bytes());
    frame
        .params
        .iter()
        .for_each(|param| raw.extend_from_slice(&param.to_be_bytes()));

    Ok(raw)
}

fn read_quadlet(raw: &[u8], pos: usize) -> u32 {
    let mut quadlet = [0; QUADLET_SIZE];
    quadlet.copy_from_slice(&raw[pos..(pos + QUADLET_SIZE)]);
    u32::from_be_bytes(quadlet)
}

/// Deserialize one frame from the head of the given buffer, returning the number of consumed
/// bytes. The buffer can convey several frames in a row.
pub fn deserialize_frame(frame: &mut TransactionFrame, raw: &[u8]) -> Result<usize, Error> {
    if raw.len() < HEADER_QUADLET_COUNT * QUADLET_SIZE {
        let msg = format!("Frame shorter than header: {}", raw.len());
        Err(Error::new(FileError::Inval, &msg))?;
    }

    let count = read_quadlet(raw, 0) as usize;
    if count < HEADER_QUADLET_COUNT
        || count > MAX_FRAME_QUADLET_COUNT
        || count * QUADLET_SIZE > raw.len()
    {
        let msg = format!("Invalid length field in frame: {}", count);
        Err(Error::new(FileError::Inval, &msg))?;
    }

    frame.version = read_quadlet(raw, 4);
    frame.seqnum = read_quadlet(raw, 8);
    frame.category = read_quadlet(raw, 12);
    frame.command = read_quadlet(raw, 16);
    frame.status = read_quadlet(raw, 20);
    frame.params = (HEADER_QUADLET_COUNT..count)
        .map(|i| read_quadlet(raw, i * QUADLET_SIZE))
        .collect();

    Ok(count * QUADLET_SIZE)
}
