// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

//! Parser for firmware container file distributed by the vendor. The file is line-oriented
//! ASCII; one magic line, 8 header entries, a fixed gap, then payload entries. Each entry line
//! is hexadecimal literal with `0x` prefix terminated by CRLF. The payload is qualified by
//! CRC-32 and byte-wise checksum in the header.

use {
    glib::{error::ErrorDomain, Error, FileError, Quark},
    std::{
        fs::File,
        io::{BufRead, BufReader, Read},
        path::Path,
    },
};

const MAGIC_LINE: &str = "1651 1 0 0 0\r\n";

const HEADER_ENTRY_COUNT: usize = 8;

// The index of entry line at which the payload begins. Entry lines have 12 bytes, and the gap
// between header and payload carries no information.
const PAYLOAD_OFFSET_QUADS: usize = 0x3f;
const ENTRY_LINE_SIZE: usize = 12;

// An entry line longer than the read buffer of the vendor tool is refused.
const ENTRY_BUFFER_SIZE: usize = 16;

/// The enumeration to express error cause to parse firmware container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerParseError {
    /// The file terminates before expected entries.
    TruncatedFile,
    /// The line is not formed as expected; wrong magic, missing CRLF termination, or invalid
    /// hexadecimal literal.
    MalformedEntry,
    /// CRC-32 of payload differs from the header field.
    CrcMismatch,
    /// Byte-wise checksum of payload differs from the header field.
    ChecksumMismatch,
    Invalid(i32),
}

impl std::fmt::Display for ContainerParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            ContainerParseError::TruncatedFile => "truncated-file",
            ContainerParseError::MalformedEntry => "malformed-entry",
            ContainerParseError::CrcMismatch => "crc-mismatch",
            ContainerParseError::ChecksumMismatch => "checksum-mismatch",
            ContainerParseError::Invalid(_) => "invalid",
        };

        write!(f, "ContainerParseError::{}", msg)
    }
}

impl ErrorDomain for ContainerParseError {
    fn domain() -> Quark {
        Quark::from_str("efw-downloader-container-parse-error-quark")
    }

    fn code(self) -> i32 {
        match self {
            ContainerParseError::TruncatedFile => 0,
            ContainerParseError::MalformedEntry => 1,
            ContainerParseError::CrcMismatch => 2,
            ContainerParseError::ChecksumMismatch => 3,
            ContainerParseError::Invalid(v) => v,
        }
    }

    fn from(code: i32) -> Option<Self> {
        let enumeration = match code {
            0 => ContainerParseError::TruncatedFile,
            1 => ContainerParseError::MalformedEntry,
            2 => ContainerParseError::CrcMismatch,
            3 => ContainerParseError::ChecksumMismatch,
            _ => ContainerParseError::Invalid(code),
        };
        Some(enumeration)
    }
}

/// The type of blob in firmware container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobType {
    /// For DSP (Texas Instruments TMS320C67).
    Dsp,
    /// For ARM core in IceLynx Micro.
    IceLynx,
    /// For any data.
    Data,
    /// For FPGA (Xilinx Spartan XC35250E).
    Fpga,
    Reserved(u32),
}

impl Default for BlobType {
    fn default() -> Self {
        Self::Reserved(u32::MAX)
    }
}

pub fn serialize_blob_type(blob_type: &BlobType) -> u32 {
    match blob_type {
        BlobType::Dsp => 0,
        BlobType::IceLynx => 1,
        BlobType::Data => 2,
        BlobType::Fpga => 3,
        BlobType::Reserved(val) => *val,
    }
}

fn deserialize_blob_type(blob_type: &mut BlobType, val: u32) {
    *blob_type = match val {
        0 => BlobType::Dsp,
        1 => BlobType::IceLynx,
        2 => BlobType::Data,
        3 => BlobType::Fpga,
        _ => BlobType::Reserved(val),
    };
}

/// The header of firmware container file.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// The type of blob.
    pub blob_type: BlobType,
    /// The offset in on-board flash memory at which the blob begins.
    pub offset_addr: u32,
    /// The number of quadlets in the blob.
    pub blob_quads: u32,
    /// CRC-32 of the blob.
    pub blob_crc32: u32,
    /// Byte-wise checksum of the blob.
    pub blob_checksum: u32,
    /// The version of firmware expressed by the blob.
    pub version: u32,
    /// Whether the pair of version and CRC-32 is stored in the last two quadlets of the region
    /// at write operation.
    pub crc_in_region_end: bool,
    /// The total number of quadlets in the container file.
    pub cntr_quads: u32,
}

/// The content of firmware container file.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub header: ContainerHeader,
    pub blob: Vec<u32>,
}

fn parse_entry<R: BufRead>(reader: &mut R) -> Result<u32, Error> {
    let mut line = String::new();
    let consumed = reader.read_line(&mut line).map_err(|e| {
        if e.kind() == std::io::ErrorKind::InvalidData {
            Error::new(ContainerParseError::MalformedEntry, "Entry is not ASCII text")
        } else {
            Error::new(FileError::Failed, &e.to_string())
        }
    })?;
    if consumed == 0 {
        Err(Error::new(
            ContainerParseError::TruncatedFile,
            "File terminates before expected entry",
        ))?;
    }

    if !line.ends_with("\r\n") || !line.starts_with("0x") || line.len() >= ENTRY_BUFFER_SIZE {
        let msg = format!("Invalid entry line: {}", line.escape_debug());
        Err(Error::new(ContainerParseError::MalformedEntry, &msg))?;
    }

    let literal = &line[2..(line.len() - 2)];
    u32::from_str_radix(literal, 16).map_err(|_| {
        let msg = format!("Invalid hexadecimal literal: {}", literal);
        Error::new(ContainerParseError::MalformedEntry, &msg)
    })
}

fn parse_header<R: BufRead>(reader: &mut R) -> Result<ContainerHeader, Error> {
    let mut entries = [0; HEADER_ENTRY_COUNT];
    for entry in entries.iter_mut() {
        *entry = parse_entry(reader)?;
    }

    let mut header = ContainerHeader::default();
    deserialize_blob_type(&mut header.blob_type, entries[0]);
    header.offset_addr = entries[1];
    header.blob_quads = entries[2];
    header.blob_crc32 = entries[3];
    header.blob_checksum = entries[4];
    header.version = entries[5];
    header.crc_in_region_end = entries[6] > 0;
    header.cntr_quads = entries[7];

    Ok(header)
}

/// Compute CRC-32 of the blob. The vendor tool qualifies the quadlet values as they sit in
/// memory, not the big-endian layout transferred to the unit.
pub fn blob_crc32(blob: &[u32]) -> u32 {
    let mut bytes = Vec::with_capacity(blob.len() * 4);
    blob.iter()
        .for_each(|quad| bytes.extend_from_slice(&quad.to_ne_bytes()));
    crc32fast::hash(&bytes)
}

fn blob_checksum(blob: &[u32]) -> u32 {
    blob.iter().fold(0u32, |checksum, quad| {
        (0..4).fold(checksum, |checksum, i| {
            checksum.wrapping_add((quad >> (i * 8)) & 0xff)
        })
    })
}

impl Container {
    /// Parse content of firmware container file.
    pub fn from_reader<R: BufRead>(reader: &mut R) -> Result<Self, Error> {
        let mut line = String::new();
        let consumed = reader
            .read_line(&mut line)
            .map_err(|e| Error::new(FileError::Failed, &e.to_string()))?;
        if consumed == 0 {
            Err(Error::new(
                ContainerParseError::TruncatedFile,
                "File terminates before magic bytes",
            ))?;
        }
        if line != MAGIC_LINE {
            let msg = format!("Invalid magic bytes: {}", line.escape_debug());
            Err(Error::new(ContainerParseError::MalformedEntry, &msg))?;
        }

        let header = parse_header(reader)?;

        // Skip to area for payload.
        let mut gap = vec![0; (PAYLOAD_OFFSET_QUADS - (HEADER_ENTRY_COUNT - 1)) * ENTRY_LINE_SIZE];
        reader.read_exact(&mut gap).map_err(|_| {
            Error::new(
                ContainerParseError::TruncatedFile,
                "File terminates before payload",
            )
        })?;

        let blob = (0..header.blob_quads)
            .map(|_| parse_entry(reader))
            .collect::<Result<Vec<u32>, Error>>()?;

        if blob_crc32(&blob) != header.blob_crc32 {
            let msg = format!(
                "CRC-32 of payload {:08x} against {:08x} in header",
                blob_crc32(&blob),
                header.blob_crc32
            );
            Err(Error::new(ContainerParseError::CrcMismatch, &msg))?;
        }

        if blob_checksum(&blob) != header.blob_checksum {
            let msg = format!(
                "Checksum of payload {:08x} against {:08x} in header",
                blob_checksum(&blob),
                header.blob_checksum
            );
            Err(Error::new(ContainerParseError::ChecksumMismatch, &msg))?;
        }

        Ok(Container { header, blob })
    }

    /// Open the file in the path and parse the content.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|e| {
            let kind = match e.kind() {
                std::io::ErrorKind::NotFound => FileError::Noent,
                std::io::ErrorKind::PermissionDenied => FileError::Acces,
                _ => FileError::Failed,
            };
            let msg = format!("Fail to open {}: {}", path.display(), e);
            Error::new(kind, &msg)
        })?;

        Self::from_reader(&mut BufReader::new(file))
    }
}
