// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Packages a project build directory into a shareable bitstream archive.
//!
//! Normally invoked by the gateware build system once `top.bit` (and
//! optionally `firmware.bin`) exist in the build directory.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};

use tiliqua_archive::builder::OPTIONS_SENTINEL;
use tiliqua_archive::{ArchiveBuilder, FirmwareLocation};
use tiliqua_manifest::ExternalPLLConfig;

#[derive(Parser)]
#[command(name = "tiliqua-pack", version, about = "Create a Tiliqua bitstream archive")]
struct Cli {
    /// Project build directory containing top.bit
    #[arg(long)]
    build_path: PathBuf,

    /// Project name, e.g. POLYSYN
    #[arg(long)]
    name: String,

    /// Short commit identifier of the build
    #[arg(long)]
    sha: String,

    /// Major hardware revision the bitstream was built for
    #[arg(long)]
    hw_rev: u32,

    /// One-line description shown by the bootloader
    #[arg(long, default_value = "")]
    brief: String,

    /// Video mode description shown by the bootloader
    #[arg(long, default_value = "")]
    video: String,

    /// Firmware image to include
    #[arg(long)]
    fw: Option<PathBuf>,

    /// Where the firmware executes from
    #[arg(long, value_enum, default_value_t = FwLocation::Psram)]
    fw_location: FwLocation,

    /// Firmware offset: SPI flash address for XiP, PSRAM destination
    /// otherwise (hex accepted)
    #[arg(long, value_parser = parse_u32, default_value = "0")]
    fw_offset: u32,

    /// Add an option storage region of this many bytes (hex accepted)
    #[arg(long, value_parser = parse_u32)]
    option_storage: Option<u32>,

    /// External PLL clk0 frequency in Hz
    #[arg(long)]
    clk0_hz: Option<u32>,

    /// External PLL clk1 frequency in Hz
    #[arg(long)]
    clk1_hz: Option<u32>,

    /// clk1 inherits the clk0 source
    #[arg(long)]
    clk1_inherit: bool,

    /// Spread spectrum modulation fraction
    #[arg(long)]
    spread_spectrum: Option<f32>,

    /// Validate the existing bitstream instead of requiring a fresh build
    #[arg(long)]
    fw_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FwLocation {
    Bram,
    Spiflash,
    Psram,
}

impl From<FwLocation> for FirmwareLocation {
    fn from(location: FwLocation) -> Self {
        match location {
            FwLocation::Bram => FirmwareLocation::Bram,
            FwLocation::Spiflash => FirmwareLocation::SpiFlash,
            FwLocation::Psram => FirmwareLocation::Psram,
        }
    }
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let result = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    result.map_err(|e| format!("invalid value '{}': {}", s, e))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut builder = ArchiveBuilder::new(&cli.build_path, &cli.name, &cli.sha, cli.hw_rev)?
        .with_brief(&cli.brief)
        .with_video(&cli.video);

    if cli.fw_only && !builder.validate_existing_bitstream() {
        bail!("existing bitstream does not match this project");
    }

    if let Some(clk0_hz) = cli.clk0_hz {
        builder = builder.with_external_pll(ExternalPLLConfig {
            clk0_hz,
            clk1_hz: cli.clk1_hz,
            clk1_inherit: cli.clk1_inherit,
            spread_spectrum: cli.spread_spectrum,
        });
    }

    builder = builder.with_bitstream("top.bit")?;
    if let Some(fw) = &cli.fw {
        builder = builder.with_firmware(fw, cli.fw_location.into(), cli.fw_offset)?;
    }
    if let Some(size) = cli.option_storage {
        builder = builder.with_option_storage(OPTIONS_SENTINEL, size);
    }

    builder.with_manifest().create()?;
    Ok(())
}
