// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

use {
    super::{regions::*, TIMEOUT_MS},
    efw_downloader_protocols::{flash::FlashProtocol, hw_info::*, EfwProtocol},
    glib::{Error, FileError},
    tracing::debug,
};

pub fn run<P: EfwProtocol>(proto: &mut P) -> Result<(), Error> {
    let mut info = HwInfo::default();
    proto.hw_info(&mut info, TIMEOUT_MS)?;

    if !info.is_supported_model() {
        let msg = format!("The unit is not for Fireworks device: {:08x}", info.hw_type);
        Err(Error::new(FileError::Nxio, &msg))?;
    }

    debug!(
        model = %info.model_name,
        vendor = %info.vendor_name,
        has_fpga = info.has_fpga,
        has_dsp = info.has_dsp,
        "hardware information"
    );

    if info.has_fpga {
        if !detect_icelynx_and_fpga(proto) {
            Err(Error::new(
                FileError::Nxio,
                "Fail to detect for IceLynx Micro and FPGA",
            ))?;
        }
    } else {
        if !detect_icelynx_and_dsp(proto) {
            Err(Error::new(
                FileError::Nxio,
                "Fail to detect for IceLynx Micro and DSP",
            ))?;
        }
    }

    Ok(())
}

// The tail of a programmed region conveys the pair of version and CRC-32, never the blank
// pattern of erased flash memory.
fn region_tail<P: EfwProtocol>(proto: &mut P, offset: u32) -> Option<[u32; 2]> {
    let mut data = [0; 2];
    proto
        .flash_read(offset, &mut data, TIMEOUT_MS)
        .ok()
        .map(|_| data)
}

fn detect_icelynx_and_fpga<P: EfwProtocol>(proto: &mut P) -> bool {
    let fpga = match region_tail(proto, OFFSET_FPGA + FPGA_REGION_SIZE - 8) {
        Some(data) => data,
        None => return false,
    };
    if fpga[0] == 0xffffffff || fpga[1] == 0xffffffff {
        return false;
    }

    let icelynx = match region_tail(proto, OFFSET_ICELYNX + COMMON_REGION_SIZE - 8) {
        Some(data) => data,
        None => return false,
    };
    if icelynx[0] == 0xffffffff || icelynx[1] == 0xffffffff {
        return false;
    }

    println!("Detect IceLynx and FPGA:");
    println!("  FPGA firmware:");
    println!("    offset:   0x{:08x}", OFFSET_FPGA);
    println!("    version:  0x{:08x}", fpga[0]);
    println!("    crc32:    0x{:08x}", fpga[1]);
    println!("  IceLynx firmware:");
    println!("    offset:   0x{:08x}", OFFSET_ICELYNX);
    println!("    version:  0x{:08x}", icelynx[0]);
    println!("    crc32:    0x{:08x}", icelynx[1]);

    true
}

fn detect_icelynx_and_dsp<P: EfwProtocol>(proto: &mut P) -> bool {
    // The bootstrap region has no trailing pair; its last quadlet is programmed while the
    // quadlet just after the region keeps blank.
    let bootstrap = match region_tail(proto, OFFSET_BOOTSTRAP + BOOTSTRAP_REGION_SIZE - 4) {
        Some(data) => data,
        None => return false,
    };
    if bootstrap[0] == 0xffffffff || bootstrap[1] != 0xffffffff {
        return false;
    }

    let dsp_a = match region_tail(proto, OFFSET_DSP_A + COMMON_REGION_SIZE - 8) {
        Some(data) => data,
        None => return false,
    };
    if dsp_a[0] == 0xffffffff || dsp_a[1] == 0xffffffff {
        return false;
    }

    let icelynx = match region_tail(proto, OFFSET_ICELYNX + COMMON_REGION_SIZE - 8) {
        Some(data) => data,
        None => return false,
    };
    if icelynx[0] == 0xffffffff || icelynx[1] == 0xffffffff {
        return false;
    }

    let dsp_b = match region_tail(proto, OFFSET_DSP_B + COMMON_REGION_SIZE - 8) {
        Some(data) => data,
        None => return false,
    };
    if dsp_b[0] == 0xffffffff || dsp_b[1] == 0xffffffff {
        return false;
    }

    println!("Detect IceLynx and DSP:");
    println!("  bootstrap:");
    println!("    offset:   0x{:08x}", OFFSET_BOOTSTRAP);
    println!("  DSP firmware A:");
    println!("    offset:   0x{:08x}", OFFSET_DSP_A);
    println!("    version:  0x{:08x}", dsp_a[0]);
    println!("    crc32:    0x{:08x}", dsp_a[1]);
    println!("  IceLynx firmware:");
    println!("    offset:   0x{:08x}", OFFSET_ICELYNX);
    println!("    version:  0x{:08x}", icelynx[0]);
    println!("    crc32:    0x{:08x}", icelynx[1]);
    println!("  DSP firmware B:");
    println!("    offset:   0x{:08x}", OFFSET_DSP_B);
    println!("    version:  0x{:08x}", dsp_b[0]);
    println!("    crc32:    0x{:08x}", dsp_b[1]);

    true
}
