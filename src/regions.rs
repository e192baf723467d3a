// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

//! Layout of firmware regions in on-board flash memory. The layout differs between the two
//! combinations of chips on the board; IceLynx Micro with FPGA, and IceLynx Micro with DSP.

use {
    super::container::{BlobType, ContainerHeader},
    glib::{Error, FileError},
};

// For the combination of IceLynx Micro and FPGA.
pub const OFFSET_FPGA: u32 = 0x00000000;
pub const OFFSET_ICELYNX: u32 = 0x00100000;

// For the combination of IceLynx Micro and DSP.
pub const OFFSET_BOOTSTRAP: u32 = 0x00000000;
pub const OFFSET_DSP_A: u32 = 0x000c0000;
// The offset for IceLynx firmware is shared by the both combinations.
pub const OFFSET_DSP_B: u32 = 0x00140000;

pub const BOOTSTRAP_REGION_SIZE: u32 = 0x00000800;
pub const COMMON_REGION_SIZE: u32 = 0x00040000;
pub const FPGA_REGION_SIZE: u32 = 0x00060000;

/// Decide the number of quadlets to write for the blob, by the offset and type in the header
/// of container file and the combination of chips on the board. The whole region is written
/// so that the tail of region can convey the pair of version and CRC-32.
pub fn write_extent_quads(header: &ContainerHeader, has_fpga: bool) -> Result<usize, Error> {
    let size = match header.offset_addr {
        OFFSET_BOOTSTRAP => {
            if !header.crc_in_region_end {
                // For bootstrap.
                if header.blob_type == BlobType::Dsp && !has_fpga {
                    Ok(BOOTSTRAP_REGION_SIZE)
                } else {
                    Err(())
                }
            } else {
                if header.blob_type == BlobType::Fpga && has_fpga {
                    Ok(FPGA_REGION_SIZE)
                } else {
                    Err(())
                }
            }
        }
        OFFSET_ICELYNX => Ok(COMMON_REGION_SIZE),
        OFFSET_DSP_A | OFFSET_DSP_B => {
            if !has_fpga {
                Ok(COMMON_REGION_SIZE)
            } else {
                Err(())
            }
        }
        _ => Err(()),
    }
    .map_err(|_| {
        let msg = format!(
            "No region at offset {:08x} for the blob in the combination of chips",
            header.offset_addr
        );
        Error::new(FileError::Nxio, &msg)
    })?;

    Ok((size as usize + 3) / 4)
}
