// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Bitstream archives for the Tiliqua.
//!
//! An archive is a `.tar.gz` containing a bitstream (`top.bit`), a manifest
//! describing its memory regions (`manifest.json`) and optionally a firmware
//! image (`firmware.bin`) - a single shareable file holding everything needed
//! to flash a project into a Tiliqua slot.
//!
//! [`builder::ArchiveBuilder`] creates archives from a build directory,
//! [`loader::ArchiveLoader`] unpacks them into a scratch directory, and
//! [`resolver`] turns the abstract manifest regions into concrete, checked
//! SPI flash addresses for a chosen slot.

pub mod builder;
pub mod loader;
pub mod resolver;

pub use builder::{ArchiveBuilder, FirmwareLocation};
pub use loader::ArchiveLoader;
pub use resolver::{FlashableRegion, check_hw_compat, resolve_regions, target_for};

/// Error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bitstream has not been built (no top.bit in the build directory)")]
    BitstreamMissing,
    #[error("archive is corrupt: {0}")]
    ArchiveCorrupt(String),
    #[error("archive does not contain manifest.json")]
    ManifestMissing,
    #[error("bootloader bitstreams must be flashed to the bootloader slot (remove --slot)")]
    SlotForBootloader,
    #[error("a slot must be specified for user bitstreams")]
    SlotRequired,
    #[error("attached Tiliqua (hw=r{device}) does not match archive (hw=r{archive})")]
    HardwareMismatch { archive: u32, device: u32 },
    #[error("region '{name}' has no flash address")]
    Unresolved { name: String },
    #[error("region '{name}' at {addr:#x} is not flash page aligned")]
    Misaligned { name: String, addr: u32 },
    #[error("regions '{a}' (ends at {a_end:#x}) and '{b}' (starts at {b_start:#x}) overlap")]
    RegionOverlap {
        a: String,
        a_end: u32,
        b: String,
        b_start: u32,
    },
    #[error("region '{name}' [{start:#x}, {end:#x}) exceeds slot {slot} (ends at {slot_end:#x})")]
    SlotOverrun {
        name: String,
        start: u32,
        end: u32,
        slot: u32,
        slot_end: u32,
    },
    #[error(transparent)]
    Manifest(#[from] tiliqua_manifest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, Error>;
