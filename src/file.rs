// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

use {
    super::{
        container::{serialize_blob_type, BlobType, Container},
        FileArguments, FileOperation,
    },
    glib::Error,
};

pub fn run(args: &FileArguments) -> Result<(), Error> {
    let cntr = Container::load(&args.path)?;

    match args.op {
        FileOperation::Parse => {
            dump_header(&cntr);
            dump_payload(&cntr);
            Ok(())
        }
    }
}

fn blob_type_name(blob_type: &BlobType) -> &'static str {
    match blob_type {
        BlobType::Dsp => "DSP",
        BlobType::IceLynx => "IceLynx",
        BlobType::Data => "data",
        BlobType::Fpga => "FPGA",
        BlobType::Reserved(_) => "invalid",
    }
}

fn dump_header(cntr: &Container) {
    println!("Container header:");
    println!(
        "  type:               {} ({})",
        serialize_blob_type(&cntr.header.blob_type),
        blob_type_name(&cntr.header.blob_type)
    );
    println!("  offset_addr:        0x{:08x}", cntr.header.offset_addr);
    println!("  blob_quads:         {}", cntr.header.blob_quads);
    println!("  blob_crc32:         0x{:08x}", cntr.header.blob_crc32);
    println!("  blob_checksum:      0x{:08x}", cntr.header.blob_checksum);
    println!("  version:            0x{:08x}", cntr.header.version);
    println!("  crc_in_region_end:  {}", cntr.header.crc_in_region_end as u32);
    println!("  total_quads:        {}", cntr.header.cntr_quads);
}

fn dump_payload(cntr: &Container) {
    println!("Container payload:");
    cntr.blob.iter().enumerate().for_each(|(i, quad)| {
        println!("  {:08x}: {:08x}", cntr.header.offset_addr as usize + i * 4, quad);
    });
}
