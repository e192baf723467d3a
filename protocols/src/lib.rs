// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

#![doc = include_str!("../README.md")]

pub mod flash;
pub mod frame;
pub mod hw_info;
pub mod transaction;

use glib::{error::ErrorDomain, Error, Quark};

/// The enumeration to express status of response in Fireworks transaction. The value of status
/// field in response frame is deserialized to it, except for 0 which expresses success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfwProtocolError {
    /// Generic failure.
    Bad,
    /// The command is not supported in the category.
    BadCommand,
    /// Communication failure in the unit.
    CommErr,
    /// The number of quadlets in frame is not expected.
    BadQuadCount,
    /// The operation is not supported in the unit.
    Unsupported,
    /// No response arrived until expiration of timeout.
    Timeout,
    /// The on-board DSP didn't respond in time.
    DspTimeout,
    /// The sampling rate is not supported.
    BadRate,
    /// The source of sampling clock is not supported.
    BadClock,
    /// The channel number is out of range.
    BadChannel,
    /// The pan value is out of range.
    BadPan,
    /// The on-board flash memory is busy against operation.
    FlashBusy,
    /// The mirror configuration is invalid.
    BadMirror,
    /// The state of LED is invalid.
    BadLed,
    /// The given parameter is invalid.
    BadParameter,
    /// The response frame has more parameters than the caller prepared for.
    LargeResp,
    Invalid(i32),
}

impl std::fmt::Display for EfwProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            EfwProtocolError::Bad => "bad",
            EfwProtocolError::BadCommand => "bad-command",
            EfwProtocolError::CommErr => "comm-err",
            EfwProtocolError::BadQuadCount => "bad-quad-count",
            EfwProtocolError::Unsupported => "unsupported",
            EfwProtocolError::Timeout => "timeout",
            EfwProtocolError::DspTimeout => "dsp-timeout",
            EfwProtocolError::BadRate => "bad-rate",
            EfwProtocolError::BadClock => "bad-clock",
            EfwProtocolError::BadChannel => "bad-channel",
            EfwProtocolError::BadPan => "bad-pan",
            EfwProtocolError::FlashBusy => "flash-busy",
            EfwProtocolError::BadMirror => "bad-mirror",
            EfwProtocolError::BadLed => "bad-led",
            EfwProtocolError::BadParameter => "bad-parameter",
            EfwProtocolError::LargeResp => "large-resp",
            EfwProtocolError::Invalid(_) => "invalid",
        };

        write!(f, "EfwProtocolError::{}", msg)
    }
}

impl ErrorDomain for EfwProtocolError {
    fn domain() -> Quark {
        Quark::from_str("efw-protocol-error-quark")
    }

    fn code(self) -> i32 {
        match self {
            EfwProtocolError::Bad => 1,
            EfwProtocolError::BadCommand => 2,
            EfwProtocolError::CommErr => 3,
            EfwProtocolError::BadQuadCount => 4,
            EfwProtocolError::Unsupported => 5,
            EfwProtocolError::Timeout => 6,
            EfwProtocolError::DspTimeout => 7,
            EfwProtocolError::BadRate => 8,
            EfwProtocolError::BadClock => 9,
            EfwProtocolError::BadChannel => 10,
            EfwProtocolError::BadPan => 11,
            EfwProtocolError::FlashBusy => 12,
            EfwProtocolError::BadMirror => 13,
            EfwProtocolError::BadLed => 14,
            EfwProtocolError::BadParameter => 15,
            EfwProtocolError::LargeResp => 16,
            EfwProtocolError::Invalid(v) => v,
        }
    }

    fn from(code: i32) -> Option<Self> {
        let enumeration = match code {
            1 => EfwProtocolError::Bad,
            2 => EfwProtocolError::BadCommand,
            3 => EfwProtocolError::CommErr,
            4 => EfwProtocolError::BadQuadCount,
            5 => EfwProtocolError::Unsupported,
            6 => EfwProtocolError::Timeout,
            7 => EfwProtocolError::DspTimeout,
            8 => EfwProtocolError::BadRate,
            9 => EfwProtocolError::BadClock,
            10 => EfwProtocolError::BadChannel,
            11 => EfwProtocolError::BadPan,
            12 => EfwProtocolError::FlashBusy,
            13 => EfwProtocolError::BadMirror,
            14 => EfwProtocolError::BadLed,
            15 => EfwProtocolError::BadParameter,
            16 => EfwProtocolError::LargeResp,
            _ => EfwProtocolError::Invalid(code),
        };
        Some(enumeration)
    }
}

// The highest status the unit can declare. Anything above it in a response frame is folded to
// the generic failure so that the set of statuses stays closed.
pub(crate) const STATUS_MAX: u32 = 15;

pub(crate) fn status_to_error(status: u32, msg: &str) -> Result<(), Error> {
    if status == 0 {
        Ok(())
    } else {
        let code = if status <= STATUS_MAX { status } else { 1 };
        let err = <EfwProtocolError as ErrorDomain>::from(code as i32)
            .unwrap_or(EfwProtocolError::Bad);
        Err(Error::new(err, msg))
    }
}

/// The trait to express transaction in Fireworks protocol. The implementation transfers command
/// frame with the given category, command, and arguments, then delivers parameters in the
/// corresponding response frame to the given mutable vector. The vector should be allocated
/// to the maximum number of parameters the caller expects; it is truncated to the actual
/// number at success.
pub trait EfwProtocol {
    fn transaction(
        &mut self,
        category: u32,
        command: u32,
        args: &[u32],
        params: &mut Vec<u32>,
        timeout_ms: u32,
    ) -> Result<(), Error>;
}
