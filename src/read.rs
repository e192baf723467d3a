// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

use {
    super::TIMEOUT_MS,
    efw_downloader_protocols::{flash::FlashProtocol, EfwProtocol},
    glib::Error,
};

pub fn run<P: EfwProtocol>(proto: &mut P, offset: u32, length: u32) -> Result<(), Error> {
    let quads = (length as usize + 3) / 4;
    let mut data = vec![0; quads];

    proto.flash_recursive_read(offset, &mut data, TIMEOUT_MS)?;

    data.iter().enumerate().for_each(|(i, quad)| {
        println!("  {:08x}: {:08x}", offset as usize + 4 * i, quad);
    });

    Ok(())
}
