// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

mod config_rom;
mod container;
mod detect;
mod device;
mod dispatcher;
mod file;
mod read;
mod regions;
mod update;

use {
    self::container::ContainerParseError,
    clap::{Args, Parser, Subcommand},
    efw_downloader_protocols::EfwProtocolError,
    glib::{Error, FileError},
    hinawa::FwNodeError,
    std::path::PathBuf,
    tracing::Level,
};

// The timeout until the unit responds against any command.
pub(crate) const TIMEOUT_MS: u32 = 200;

#[derive(Parser)]
#[clap(name = "efw-downloader")]
struct Arguments {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Operate for the unit on IEEE 1394 bus.
    Device(DeviceArguments),
    /// Operate for firmware container file.
    File(FileArguments),
}

#[derive(Args)]
pub struct DeviceArguments {
    /// The path to special file of Linux FireWire character device for the unit.
    pub cdev: String,

    #[clap(subcommand)]
    pub op: DeviceOperation,

    /// Output debug message to stderr.
    #[clap(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum DeviceOperation {
    /// Detect the layout of firmware in on-board flash memory.
    Detect,
    /// Read content of on-board flash memory.
    Read(ReadArguments),
    /// Update firmware in on-board flash memory by content of container file.
    Update(UpdateArguments),
}

#[derive(Args)]
pub struct ReadArguments {
    /// The hexadecimal offset in on-board flash memory.
    #[clap(parse(try_from_str = parse_hex))]
    pub offset: u32,

    /// The hexadecimal number of bytes to read, aligned to quadlet finally.
    #[clap(parse(try_from_str = parse_hex))]
    pub length: u32,
}

#[derive(Args)]
pub struct UpdateArguments {
    /// The path to firmware container file.
    pub path: PathBuf,

    /// Do everything except erase, write, and verify operations to flash memory.
    #[clap(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct FileArguments {
    /// The path to firmware container file.
    pub path: PathBuf,

    #[clap(subcommand)]
    pub op: FileOperation,
}

#[derive(Subcommand)]
pub enum FileOperation {
    /// Parse the container file, then dump the header and payload.
    Parse,
}

fn parse_hex(literal: &str) -> Result<u32, String> {
    u32::from_str_radix(literal.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn specific_err_to_string(e: &Error) -> String {
    let (domain, cause) = if let Some(error) = e.kind::<FileError>() {
        (
            "Linux file operation error",
            match error {
                FileError::Acces => "Access permission",
                FileError::Noent => "Not exists",
                FileError::Nxio => "Not addressed",
                FileError::Io => "Input/output failure",
                FileError::Inval => "Invalid argument",
                _ => "",
            },
        )
    } else if let Some(error) = e.kind::<FwNodeError>() {
        (
            "Linux FireWire node operation error",
            match error {
                FwNodeError::Disconnected => "Node is disconnected",
                _ => "",
            },
        )
    } else if let Some(error) = e.kind::<EfwProtocolError>() {
        (
            "Fireworks transaction error",
            match error {
                EfwProtocolError::Timeout => "No response from the unit",
                EfwProtocolError::FlashBusy => "Flash memory is busy",
                _ => "",
            },
        )
    } else if e.is::<ContainerParseError>() {
        ("Firmware container file error", "")
    } else {
        ("Unknown domain error", "")
    };
    format!("{}: {}, {}", domain, cause, e)
}

fn main() {
    let args = Arguments::parse();

    if let SubCommand::Device(device_args) = &args.subcmd {
        if device_args.debug {
            tracing_subscriber::fmt()
                .with_max_level(Level::DEBUG)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let code = match &args.subcmd {
        SubCommand::Device(device_args) => device::run(device_args),
        SubCommand::File(file_args) => file::run(file_args),
    }
    .map(|_| libc::EXIT_SUCCESS)
    .map_err(|e| specific_err_to_string(&e))
    .unwrap_or_else(|msg| {
        eprintln!("{}", msg);
        libc::EXIT_FAILURE
    });

    std::process::exit(code)
}
