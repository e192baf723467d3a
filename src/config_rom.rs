// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

use {
    glib::{Error, FileError},
    ieee1212_config_rom::ConfigRom,
    std::convert::TryFrom,
    ta1394_avc_general::config_rom::Ta1394ConfigRom,
};

/// Parse configuration ROM of the node and return the pair of vendor and model identifiers as
/// long as the unit is based on Fireworks board module.
pub fn detect_vendor_and_model(raw: &[u8]) -> Result<(u32, u32), Error> {
    let config_rom = ConfigRom::try_from(raw).map_err(|e| {
        let msg = format!("Malformed configuration ROM detected: {}", e);
        Error::new(FileError::Nxio, &msg)
    })?;

    let (vendor, model) = config_rom
        .get_vendor()
        .and_then(|vendor| config_rom.get_model().map(|model| (vendor, model)))
        .ok_or_else(|| {
            Error::new(
                FileError::Nxio,
                "Configuration ROM is not for 1394TA standard",
            )
        })?;

    if is_supported_pair(vendor.vendor_id, model.model_id) {
        Ok((vendor.vendor_id, model.model_id))
    } else {
        let msg = format!(
            "The unit is not for Fireworks board module: vendor {:06x}, model {:06x}",
            vendor.vendor_id, model.model_id
        );
        Err(Error::new(FileError::Nxio, &msg))
    }
}

fn is_supported_pair(vendor_id: u32, model_id: u32) -> bool {
    match (vendor_id, model_id) {
        // Mackie/Loud Onyx 400F.
        (0x000ff2, 0x00400f) |
        // Mackie/Loud Onyx 1200F.
        (0x000ff2, 0x01200f) |
        // Echo Digital Audio, AudioFire 2.
        (0x001486, 0x000af2) |
        // Echo Digital Audio, AudioFire 4.
        (0x001486, 0x000af4) |
        // Echo Digital Audio, AudioFire 8.
        (0x001486, 0x000af8) |
        // Echo Digital Audio, AudioFire 8/Pre8.
        (0x001486, 0x000af9) |
        // Echo Digital Audio, AudioFire 12.
        (0x001486, 0x00af12) |
        // Echo Digital Audio, AudioFire 12 HD.
        (0x001486, 0x0af12d) |
        // Echo Digital Audio, AudioFire 12 for Apple.
        (0x001486, 0x0af12a) |
        // Echo Digital Audio, Fireworks HDMI.
        (0x001486, 0x00afd1) |
        // Gibson, Robot Interface Pack (RIP) for Robot Guitar series.
        (0x00075b, 0x00afb2) |
        // Gibson, RIP for Dark Fire series.
        (0x00075b, 0x00afb9) => true,
        _ => false,
    }
}
