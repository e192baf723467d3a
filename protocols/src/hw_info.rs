// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

//! Protocol about hardware information.
//!
//! The module includes protocol about hardware information defined by Echo Audio Digital
//! Corporation for Fireworks board module. The response is a fixed layout of 65 quadlets; the
//! structure keeps the fields which matter to firmware operation.

use super::*;

const CATEGORY_HWINFO: u32 = 0;

const CMD_HWINFO: u32 = 0;

const HWINFO_QUADS: usize = 65;

// Capability bits in the flags field.
const CAP_HAS_DSP: u32 = 0x00000010;
const CAP_HAS_FPGA: u32 = 0x00000020;

// Known models, by the value of type field.
const O400F: u32 = 0x0000400f;
const O1200F: u32 = 0x0001200f;
const AF2: u32 = 0x00000af2;
const AF4: u32 = 0x00000af4;
const AF8: u32 = 0x00000af8;
const AFP8: u32 = 0x00000af9;
const AF12: u32 = 0x0000af12;
const AF12HD: u32 = 0x000af12d;
const AF12A: u32 = 0x000af12a;
const FWHDMI: u32 = 0x0000afd1;
const RIP: u32 = 0x0000afb2;
const AUDIOPUNK: u32 = 0x0000afb9;

/// Information of hardware.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct HwInfo {
    /// Whether the unit mounts DSP (Texas Instruments TMS320C67).
    pub has_dsp: bool,
    /// Whether the unit mounts FPGA (Xilinx Spartan XC35250E).
    pub has_fpga: bool,
    /// Global unique identifier of the unit.
    pub guid: u64,
    /// The value of type field, equal to the model identifier in configuration ROM.
    pub hw_type: u32,
    /// The version of hardware.
    pub hw_version: u32,
    /// The name of vendor.
    pub vendor_name: String,
    /// The name of model.
    pub model_name: String,
    /// The version of firmware for DSP.
    pub dsp_version: u32,
    /// The version of firmware for ARM core in IceLynx Micro.
    pub arm_version: u32,
    /// The version of firmware for FPGA.
    pub fpga_version: u32,
}

impl HwInfo {
    fn parse(&mut self, quads: &[u32]) -> Result<(), Error> {
        let flags = quads[0];
        self.has_dsp = flags & CAP_HAS_DSP > 0;
        self.has_fpga = flags & CAP_HAS_FPGA > 0;
        self.guid = ((quads[1] as u64) << 32) | (quads[2] as u64);
        self.hw_type = quads[3];
        self.hw_version = quads[4];
        self.vendor_name = parse_text(&quads[5..13])?;
        self.model_name = parse_text(&quads[13..21])?;
        self.dsp_version = quads[40];
        self.arm_version = quads[41];
        self.fpga_version = quads[44];

        Ok(())
    }

    /// Whether the value of type field belongs to any Fireworks model.
    pub fn is_supported_model(&self) -> bool {
        match self.hw_type {
            O400F | O1200F | AF2 | AF4 | AF8 | AFP8 | AF12 | AF12HD | AF12A | FWHDMI | RIP
            | AUDIOPUNK => true,
            _ => false,
        }
    }
}

fn parse_text(quads: &[u32]) -> Result<String, Error> {
    let mut literal = Vec::new();
    quads.iter().for_each(|quad| {
        literal.extend_from_slice(&quad.to_be_bytes());
    });
    if let Ok(text) = std::str::from_utf8(&literal) {
        if let Some(pos) = text.find('\0') {
            return Ok(text[0..pos].to_string());
        }
    }
    Err(Error::new(glib::FileError::Io, "Fail to parse string."))
}

/// Protocol about hardware information for Fireworks board module.
pub trait HwInfoProtocol: EfwProtocol {
    /// Read hardware information.
    fn hw_info(&mut self, info: &mut HwInfo, timeout_ms: u32) -> Result<(), Error> {
        let mut params = vec![0; HWINFO_QUADS];
        self.transaction(CATEGORY_HWINFO, CMD_HWINFO, &[], &mut params, timeout_ms)
            .and_then(|_| info.parse(&params))
    }
}

impl<O: EfwProtocol> HwInfoProtocol for O {}

#[cfg(test)]
mod test {
    use super::*;

    fn text_quads(text: &str) -> Vec<u32> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(32, 0);
        (0..8)
            .map(|i| {
                let mut quadlet = [0; 4];
                quadlet.copy_from_slice(&bytes[(i * 4)..(i * 4 + 4)]);
                u32::from_be_bytes(quadlet)
            })
            .collect()
    }

    #[test]
    fn hw_info_parse() {
        let mut quads = vec![0; HWINFO_QUADS];
        quads[0] = CAP_HAS_FPGA;
        quads[1] = 0x00140ea0;
        quads[2] = 0x01b59e6b;
        quads[3] = AF4;
        quads[4] = 2;
        quads[5..13].copy_from_slice(&text_quads("Echo Digital Audio"));
        quads[13..21].copy_from_slice(&text_quads("AudioFire4"));
        quads[40] = 0x00000000;
        quads[41] = 0x05040000;
        quads[44] = 0x00010000;

        let mut info = HwInfo::default();
        info.parse(&quads).unwrap();

        assert!(info.has_fpga);
        assert!(!info.has_dsp);
        assert_eq!(info.guid, 0x00140ea001b59e6b);
        assert_eq!(info.hw_type, AF4);
        assert_eq!(info.hw_version, 2);
        assert_eq!(&info.vendor_name, "Echo Digital Audio");
        assert_eq!(&info.model_name, "AudioFire4");
        assert_eq!(info.arm_version, 0x05040000);
        assert_eq!(info.fpga_version, 0x00010000);
        assert!(info.is_supported_model());
    }

    #[test]
    fn hw_info_model_gate() {
        let mut info = HwInfo::default();
        info.hw_type = O1200F;
        assert!(info.is_supported_model());

        info.hw_type = 0x12345678;
        assert!(!info.is_supported_model());
    }
}
