// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Flashes Tiliqua bitstream archives and reports slot status.
//!
//! Flashing never touches the device before showing the resolved region plan
//! and the exact openFPGALoader commands, then asking for confirmation.

use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use tiliqua_archive::{ArchiveLoader, check_hw_compat, resolve_regions, target_for};
use tiliqua_flash::commands::FlashPlan;
use tiliqua_flash::programmer::{DEFAULT_CABLE, Programmer, detect_tiliqua};
use tiliqua_flash::status::flash_status;
use tiliqua_manifest::N_MANIFESTS;

#[derive(Parser)]
#[command(name = "tiliqua-flash", version, about = "Flash Tiliqua bitstream archives")]
struct Cli {
    /// Cable identifier passed to openFPGALoader
    #[arg(long, default_value = DEFAULT_CABLE)]
    cable: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Flash a bitstream archive
    Archive {
        /// Path to the bitstream archive (.tar.gz)
        archive_path: PathBuf,
        /// Slot number (0-7) for bootloader-managed bitstreams; omit for
        /// bootloader archives
        #[arg(long)]
        slot: Option<u32>,
        /// Do not ask for confirmation before flashing
        #[arg(long)]
        noconfirm: bool,
        /// Erase option storage regions in the manifest
        #[arg(long)]
        erase_option_storage: bool,
    },
    /// Display current bitstream status
    Status,
}

/// Marker for errors raised after the first write command started, when the
/// device may be partially programmed
#[derive(Debug)]
struct FlashFailed;

impl fmt::Display for FlashFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flashing failed - the device may be partially programmed")
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        let code = if e.is::<FlashFailed>() { 2 } else { 1 };
        process::exit(code);
    }
}

fn run(cli: Cli) -> Result<()> {
    let programmer = Programmer::new(&cli.cable);
    match cli.command {
        Command::Archive {
            archive_path,
            slot,
            noconfirm,
            erase_option_storage,
        } => flash_archive(
            &programmer,
            &archive_path,
            slot,
            noconfirm,
            erase_option_storage,
        ),
        Command::Status => {
            detect_tiliqua(&programmer)?;
            flash_status(&programmer)
        }
    }
}

fn flash_archive(
    programmer: &Programmer,
    archive_path: &std::path::Path,
    slot: Option<u32>,
    noconfirm: bool,
    erase_option_storage: bool,
) -> Result<()> {
    if !archive_path.exists() {
        bail!("archive not found: {}", archive_path.display());
    }
    if let Some(slot) = slot {
        if slot >= N_MANIFESTS {
            bail!("slot must be between 0 and {}", N_MANIFESTS - 1);
        }
    }

    let device = detect_tiliqua(programmer)?;

    // The loader owns the extracted archive; it must stay alive until the
    // last write command has finished
    let loader = ArchiveLoader::open(archive_path)
        .with_context(|| format!("failed to open {}", archive_path.display()))?;

    check_hw_compat(loader.manifest(), device.hw_rev)?;
    let layout = target_for(loader.manifest(), slot)?;
    let (revised, regions) = resolve_regions(loader.manifest(), &layout, loader.extract_dir())?;

    println!("\nFinal manifest contents:\n{}", revised);
    println!("\nRegions to flash:");
    for region in &regions {
        println!("  {}", region);
    }

    let plan = FlashPlan::generate(&regions, erase_option_storage)?;
    plan.preview(programmer.cable());

    if !noconfirm && !confirm("\nProceed with flashing? [y/N] ")? {
        bail!("flashing declined");
    }

    plan.execute(programmer).context(FlashFailed)
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().eq_ignore_ascii_case("y"))
}
