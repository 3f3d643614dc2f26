// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Bitstream manifest schema for the Tiliqua.
//!
//! A manifest is a small JSON document flashed at the end of each bitstream
//! slot, describing what the slot contains and which memory regions the
//! bootloader must set up before handing over to the user bitstream. The
//! bootloader parses the exact same document this crate emits, so the field
//! names, nesting and the constants below are a stable on-flash interface.
//!
//! The crate is `no_std` so the bootloader firmware can compile against it;
//! host tooling uses it with `std` available.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod layout;

pub use layout::SlotLayout;

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

pub const FLASH_PAGE_SZ: u32         = 0x1000;
pub const FLASH_SECTOR_SZ: u32       = 0x10000;
pub const MANIFEST_MAGIC: u32        = 0xFEEDBEEF;
pub const N_MANIFESTS: u32           = 8;
pub const SLOT_BITSTREAM_BASE: u32   = 0x100000; // First user slot starts here
pub const SLOT_SIZE: u32             = 0x100000; // Spacing between user slots
pub const MANIFEST_SIZE: u32         = 0x1000;

/// Error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Bytes are not a valid manifest document
    Parse { error: String },
    /// Serialized manifest does not fit in the on-flash manifest window
    TooLarge { size: usize },
    /// Manifest window is erased flash (all `0xFF`)
    Erased,
    /// User slot number is not in `0..N_MANIFESTS`
    SlotOutOfRange { slot: u32 },
    /// The bootloader executes in place and has no firmware base address
    NoFirmwareBase,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse { error } => write!(f, "failed to parse manifest: {}", error),
            Error::TooLarge { size } => write!(
                f,
                "serialized manifest is {} bytes, exceeds the {} byte manifest window",
                size, MANIFEST_SIZE
            ),
            Error::Erased => write!(f, "manifest window is erased (all 0xFF)"),
            Error::SlotOutOfRange { slot } => {
                write!(f, "slot {} out of range (0..{})", slot, N_MANIFESTS)
            }
            Error::NoFirmwareBase => {
                write!(f, "bootloader has no firmware base (executes in place)")
            }
        }
    }
}

impl core::error::Error for Error {}

type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RegionType {
    /// Bitstream region that gets loaded directly by the bootloader
    Bitstream,
    /// XiP firmware that executes directly from SPI flash
    XipFirmware,
    /// Region that gets copied from SPI flash to RAM before use (firmware.bin to PSRAM)
    RamLoad,
    /// Option storage region for persistent application settings
    OptionStorage,
    /// Manifest region containing metadata about the bitstream
    Manifest,
}

/// One contiguous flash area described by a manifest.
///
/// In archive form, regions whose flash address depends on the target slot
/// carry `spiflash_src: None`; the flashing tool fills it in and rewrites the
/// manifest before anything touches the device.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryRegion {
    pub filename: String,
    pub region_type: RegionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spiflash_src: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psram_dst: Option<u32>,
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc: Option<u32>,
}

/// External PLL settings the bootloader programs before starting a bitstream
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExternalPLLConfig {
    pub clk0_hz: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clk1_hz: Option<u32>,
    pub clk1_inherit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread_spectrum: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BitstreamManifest {
    pub hw_rev: u32,
    pub name: String,
    pub sha: String,
    #[serde(default)]
    pub brief: String,
    #[serde(default)]
    pub video: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_pll_config: Option<ExternalPLLConfig>,
    pub regions: Vec<MemoryRegion>,
    pub magic: u32,
}

impl BitstreamManifest {
    /// Serialize to the JSON document flashed to the manifest window.
    ///
    /// Fields holding `None` are omitted entirely so older bootloaders keep
    /// parsing newer manifests. The result must fit in `MANIFEST_SIZE`.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self).map_err(|e| Error::Parse {
            error: e.to_string(),
        })?;
        if bytes.len() > MANIFEST_SIZE as usize {
            return Err(Error::TooLarge { size: bytes.len() });
        }
        Ok(bytes)
    }

    /// Parse a manifest document. Absent optional fields are tolerated and
    /// unknown fields are ignored.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Parse {
            error: e.to_string(),
        })
    }

    /// Parse a manifest from a raw `MANIFEST_SIZE` flash window.
    ///
    /// Erasing flash sets every byte to `0xFF`, and the flashing tool may
    /// NUL-terminate the document, so the JSON payload ends at the first
    /// `0x00` or `0xFF` byte.
    pub fn from_flash_bytes(window: &[u8]) -> Result<Self> {
        if window.iter().all(|&b| b == 0xff) {
            return Err(Error::Erased);
        }
        let end = window
            .iter()
            .position(|&b| b == 0x00 || b == 0xff)
            .unwrap_or(window.len());
        Self::from_slice(&window[..end])
    }
}

impl fmt::Display for BitstreamManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BitstreamManifest {{")?;
        writeln!(f, "    magic:  {:#x}", self.magic)?;
        writeln!(f, "    hw_rev: {}", self.hw_rev)?;
        writeln!(f, "    name:   '{}'", self.name)?;
        writeln!(f, "    sha:    '{}'", self.sha)?;
        writeln!(f, "    brief:  '{}'", self.brief)?;
        writeln!(f, "    video:  '{}'", self.video)?;
        if let Some(pll) = &self.external_pll_config {
            writeln!(f, "    external_pll_config {{")?;
            writeln!(f, "        clk0_hz: {}", pll.clk0_hz)?;
            writeln!(f, "        clk1_hz: {:?}", pll.clk1_hz)?;
            writeln!(f, "        clk1_inherit: {}", pll.clk1_inherit)?;
            writeln!(f, "        spread_spectrum: {:?}", pll.spread_spectrum)?;
            writeln!(f, "    }}")?;
        }
        for (ii, region) in self.regions.iter().enumerate() {
            writeln!(f, "    region[{}] {{", ii)?;
            writeln!(f, "        filename: '{}'", region.filename)?;
            writeln!(f, "        type:     {:?}", region.region_type)?;
            if let Some(src) = region.spiflash_src {
                writeln!(f, "        spiflash_src: {:#x}", src)?;
            }
            if let Some(dst) = region.psram_dst {
                writeln!(f, "        psram_dst:    {:#x} (copyto)", dst)?;
            }
            writeln!(f, "        size:         {:#x}", region.size)?;
            if let Some(crc) = region.crc {
                writeln!(f, "        crc:          {:#x}", crc)?;
            }
            writeln!(f, "    }}")?;
        }
        write!(f, "}}")
    }
}

pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
