// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

//! Update of firmware in on-board flash memory by content of container file. The whole region
//! the blob belongs to is re-programmed; erase and write proceed block by block, then the
//! region is read back and compared against the prepared image.

use {
    super::{
        container::{blob_crc32, Container},
        regions::write_extent_quads,
        TIMEOUT_MS,
    },
    efw_downloader_protocols::{flash::*, hw_info::*, EfwProtocol},
    glib::{Error, FileError},
    std::path::Path,
    tracing::debug,
};

pub fn run<P: EfwProtocol>(proto: &mut P, path: &Path, dry_run: bool) -> Result<(), Error> {
    let cntr = Container::load(path)?;
    execute(proto, &cntr, dry_run)
}

fn execute<P: EfwProtocol>(proto: &mut P, cntr: &Container, dry_run: bool) -> Result<(), Error> {
    let mut info = HwInfo::default();
    proto.hw_info(&mut info, TIMEOUT_MS)?;

    let quads = write_extent_quads(&cntr.header, info.has_fpga)?;

    if cntr.blob.len() > quads {
        let msg = format!(
            "The blob with {} quadlets exceeds the region with {} quadlets",
            cntr.blob.len(),
            quads
        );
        Err(Error::new(FileError::Inval, &msg))?;
    }

    let mut read_buf = vec![0u32; quads];

    proto.flash_recursive_read(cntr.header.offset_addr, &mut read_buf, TIMEOUT_MS)?;
    print_firmware("Previous firmware", cntr, &read_buf);

    // The region is filled by the blank pattern of erased flash memory around the blob.
    let mut write_buf = vec![0xffffffffu32; quads];
    write_buf[..cntr.blob.len()].copy_from_slice(&cntr.blob);
    if cntr.header.crc_in_region_end {
        write_buf[quads - 2] = cntr.header.version;
        write_buf[quads - 1] = cntr.header.blob_crc32;
    }

    if info.has_fpga {
        proto.flash_lock(true, TIMEOUT_MS)?;
        eprintln!("Flash memory is locked.");
    }

    let result = program_and_verify(proto, cntr, &write_buf, &mut read_buf, dry_run);

    if info.has_fpga {
        // Once taken, the lock is restored whether programming succeeded or not.
        let unlocked = proto.flash_lock(false, TIMEOUT_MS).map(|_| {
            eprintln!("Flash memory is unlocked.");
        });
        result.and(unlocked)
    } else {
        result
    }
}

fn program_and_verify<P: EfwProtocol>(
    proto: &mut P,
    cntr: &Container,
    write_buf: &[u32],
    read_buf: &mut [u32],
    dry_run: bool,
) -> Result<(), Error> {
    erase_and_write(proto, cntr.header.offset_addr, write_buf, dry_run)?;
    print_firmware("Current firmware", cntr, write_buf);

    if !dry_run {
        proto.flash_recursive_read(cntr.header.offset_addr, read_buf, TIMEOUT_MS)?;
        if write_buf != read_buf {
            let count = write_buf
                .iter()
                .zip(read_buf.iter())
                .filter(|(w, r)| w != r)
                .count();
            eprintln!("Written quadlets are not the same as read quadlets: {} differ.", count);
            Err(Error::new(
                FileError::Io,
                "Fail to verify content of flash memory against the prepared image",
            ))?;
        }
    } else {
        eprintln!("Written quadlets should be read and compared to the prepared image at last.");
    }

    // Reading the base makes the unit drop cached session data at next bootup.
    let base = proto.flash_session_base(TIMEOUT_MS)?;
    println!("base: {:08x}", base);

    Ok(())
}

fn erase_and_write<P: EfwProtocol>(
    proto: &mut P,
    start: u32,
    buf: &[u32],
    dry_run: bool,
) -> Result<(), Error> {
    let mut offset = start;
    let mut buf = buf;

    while buf.len() > 0 {
        let block_size = flash_block_size(offset)?;
        let count = buf.len().min((block_size / 4) as usize);

        eprintln!("Region {:08x}-{:08x}:", offset, offset as usize + count * 4);

        if !dry_run {
            proto.flash_erase_and_wait(offset, TIMEOUT_MS)?;
            eprintln!("  erased.");

            proto.flash_recursive_write(offset, &buf[..count], TIMEOUT_MS)?;
            eprintln!("  wrote 0x{:x} quadlets.", count);
        } else {
            eprintln!("  should be erased.");
            eprintln!("  should write 0x{:x} quadlets.", count);
        }

        offset += (count * 4) as u32;
        buf = &buf[count..];
    }

    Ok(())
}

fn print_firmware(label: &str, cntr: &Container, buf: &[u32]) {
    debug!(label, quads = buf.len());

    println!("{}:", label);
    println!("  offset:   {:08x}", cntr.header.offset_addr);
    if cntr.header.crc_in_region_end {
        println!("  version:  {:08x}", buf[buf.len() - 2]);
        println!("  crc32:    {:08x}", buf[buf.len() - 1]);
    } else {
        let count = (cntr.header.blob_quads as usize).min(buf.len());
        println!("  crc32:    {:08x}", blob_crc32(&buf[..count]));
    }
}
