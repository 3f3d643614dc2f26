// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Builds bitstream archives from a project build directory.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crc::{CRC_32_BZIP2, Crc};
use flate2::Compression;
use flate2::write::GzEncoder;
use log::warn;

use tiliqua_manifest::{
    BitstreamManifest, ExternalPLLConfig, FLASH_PAGE_SZ, MANIFEST_MAGIC, MANIFEST_SIZE,
    MemoryRegion, RegionType,
};

use crate::{Error, Result};

/// CRC algorithm used for region content checksums, matching the bootloader's
/// integrity check
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_BZIP2);

/// Canonical in-archive name of the bitstream
pub const BITSTREAM_NAME: &str = "top.bit";
/// Canonical in-archive name of the manifest
pub const MANIFEST_NAME: &str = "manifest.json";
/// Canonical in-archive name of the firmware image
pub const FIRMWARE_NAME: &str = "firmware.bin";
/// Placeholder filename for regions that have no content file
pub const OPTIONS_SENTINEL: &str = "<options>";

/// Where a project's firmware executes from, deciding how (and whether) it is
/// carried in the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareLocation {
    /// Baked into the bitstream, no separate region needed
    Bram,
    /// Executes in place from SPI flash at a fixed offset
    SpiFlash,
    /// Copied by the bootloader from SPI flash into PSRAM
    Psram,
}

/// Builds and writes bitstream archives.
///
/// Model is to create the builder for a project, chain `with_*` calls for
/// each artifact the build produced, then call [`create`](Self::create) to
/// write `{name}-{sha}-{hw_rev}.tar.gz` into the build directory.
#[derive(Debug)]
pub struct ArchiveBuilder {
    build_path: PathBuf,
    name: String,
    sha: String,
    hw_rev: u32,
    brief: String,
    video: String,
    external_pll_config: Option<ExternalPLLConfig>,
    regions: Vec<MemoryRegion>,
    firmware_bin_path: Option<PathBuf>,
}

impl ArchiveBuilder {
    pub fn new(build_path: &Path, name: &str, sha: &str, hw_rev: u32) -> Result<Self> {
        fs::create_dir_all(build_path)?;
        Ok(Self {
            build_path: build_path.to_path_buf(),
            name: name.to_string(),
            sha: sha.to_string(),
            hw_rev,
            brief: String::new(),
            video: String::new(),
            external_pll_config: None,
            regions: Vec::new(),
            firmware_bin_path: None,
        })
    }

    pub fn archive_name(&self) -> String {
        format!("{}-{}-{}.tar.gz", self.name.to_lowercase(), self.sha, self.hw_rev)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.build_path.join(self.archive_name())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.build_path.join(MANIFEST_NAME)
    }

    pub fn bitstream_path(&self) -> PathBuf {
        self.build_path.join(BITSTREAM_NAME)
    }

    pub fn bitstream_exists(&self) -> bool {
        self.bitstream_path().exists()
    }

    pub fn with_brief(mut self, brief: &str) -> Self {
        self.brief = brief.to_string();
        self
    }

    pub fn with_video(mut self, video: &str) -> Self {
        self.video = video.to_string();
        self
    }

    pub fn with_external_pll(mut self, config: ExternalPLLConfig) -> Self {
        self.external_pll_config = Some(config);
        self
    }

    /// Add the bitstream region. The flash address depends on the target
    /// slot, so it stays unresolved here.
    pub fn with_bitstream(mut self, filename: &str) -> Result<Self> {
        let path = self.bitstream_path();
        if !path.exists() {
            warn!("bitstream file not found at {}", path.display());
            return Ok(self);
        }
        let data = fs::read(&path)?;
        let region = MemoryRegion {
            filename: filename.to_string(),
            region_type: RegionType::Bitstream,
            spiflash_src: None, // Resolved at flash time based on slot
            psram_dst: None,    // Bitstream is never copied to PSRAM
            size: data.len() as u32,
            crc: Some(CRC32.checksum(&data)),
        };
        self.regions.insert(0, region);
        Ok(self)
    }

    /// Add a memory region for a firmware image.
    pub fn with_firmware(
        mut self,
        firmware_bin_path: &Path,
        location: FirmwareLocation,
        offset: u32,
    ) -> Result<Self> {
        if location == FirmwareLocation::Bram {
            // BRAM firmware is baked into the bitstream
            return Ok(self);
        }
        if !firmware_bin_path.exists() {
            warn!("firmware file not found at {}", firmware_bin_path.display());
            return Ok(self);
        }
        let data = fs::read(firmware_bin_path)?;
        let crc = Some(CRC32.checksum(&data));
        let region = match location {
            FirmwareLocation::SpiFlash => MemoryRegion {
                filename: FIRMWARE_NAME.to_string(),
                region_type: RegionType::XipFirmware,
                spiflash_src: Some(offset),
                psram_dst: None,
                size: data.len() as u32,
                crc,
            },
            FirmwareLocation::Psram => MemoryRegion {
                filename: FIRMWARE_NAME.to_string(),
                region_type: RegionType::RamLoad,
                spiflash_src: None, // Resolved at flash time based on slot
                psram_dst: Some(offset),
                size: data.len() as u32,
                crc,
            },
            FirmwareLocation::Bram => unreachable!(),
        };
        self.regions.push(region);
        self.firmware_bin_path = Some(firmware_bin_path.to_path_buf());
        Ok(self)
    }

    /// Add a persistent option storage region. Has no content file; the
    /// flashing tool materializes its erased state on demand.
    pub fn with_option_storage(mut self, filename: &str, size: u32) -> Self {
        self.regions.push(MemoryRegion {
            filename: filename.to_string(),
            region_type: RegionType::OptionStorage,
            spiflash_src: None,
            psram_dst: None,
            size,
            crc: None,
        });
        self
    }

    /// Add the manifest region itself. Idempotent.
    pub fn with_manifest(mut self) -> Self {
        self.ensure_manifest_region();
        self
    }

    fn ensure_manifest_region(&mut self) {
        if !self
            .regions
            .iter()
            .any(|r| r.region_type == RegionType::Manifest)
        {
            self.regions.push(MemoryRegion {
                filename: MANIFEST_NAME.to_string(),
                region_type: RegionType::Manifest,
                spiflash_src: None,
                psram_dst: None,
                size: MANIFEST_SIZE,
                crc: None,
            });
        }
    }

    /// Write `manifest.json` into the build directory and return the
    /// manifest object.
    pub fn write_manifest(&mut self) -> Result<BitstreamManifest> {
        self.ensure_manifest_region();
        let manifest = BitstreamManifest {
            hw_rev: self.hw_rev,
            name: self.name.clone(),
            sha: self.sha.clone(),
            brief: self.brief.clone(),
            video: self.video.clone(),
            external_pll_config: self.external_pll_config.clone(),
            regions: self.regions.clone(),
            magic: MANIFEST_MAGIC,
        };
        fs::write(self.manifest_path(), manifest.to_json_bytes()?)?;
        Ok(manifest)
    }

    /// One-shot manifest write and archive creation. Returns the archive
    /// path.
    pub fn create(mut self) -> Result<PathBuf> {
        if !self.bitstream_exists() {
            return Err(Error::BitstreamMissing);
        }
        let manifest = self.write_manifest()?;

        println!("\nCreating bitstream archive {}...", self.archive_name());
        let archive_path = self.archive_path();
        let gz = GzEncoder::new(File::create(&archive_path)?, Compression::default());
        let mut tar = tar::Builder::new(gz);
        tar.append_path_with_name(self.bitstream_path(), BITSTREAM_NAME)?;
        tar.append_path_with_name(self.manifest_path(), MANIFEST_NAME)?;
        if let Some(fw_path) = &self.firmware_bin_path {
            tar.append_path_with_name(fw_path, FIRMWARE_NAME)?;
        }
        tar.into_inner()?.finish()?;

        let archive_size = fs::metadata(&archive_path)?.len();
        println!("Compressed bitstream archive size: {} KiB", archive_size / 1024);
        println!(
            "\nManifest contents:\n{}",
            serde_json::to_string_pretty(&manifest).unwrap_or_default()
        );
        println!("\nSaved to '{}'", archive_path.display());
        Ok(archive_path)
    }

    /// Check that an existing bitstream and manifest in the build directory
    /// match the current project, for firmware-only rebuilds. Reports and
    /// returns `false` on failure rather than erroring, so callers can fall
    /// back to a full build.
    pub fn validate_existing_bitstream(&self) -> bool {
        if !self.bitstream_exists() {
            println!(
                "ERROR: no existing bitstream found at {}",
                self.bitstream_path().display()
            );
            println!("You must build the full project at least once before using --fw-only");
            return false;
        }
        let manifest_path = self.manifest_path();
        if !manifest_path.exists() {
            println!("ERROR: no manifest found at {}", manifest_path.display());
            println!("You must build the full project at least once before using --fw-only");
            return false;
        }
        let manifest = match fs::read(&manifest_path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                BitstreamManifest::from_slice(&bytes).map_err(|e| e.to_string())
            }) {
            Ok(manifest) => manifest,
            Err(e) => {
                println!("ERROR: failed to validate existing manifest: {}", e);
                return false;
            }
        };
        if manifest.name != self.name {
            println!(
                "ERROR: existing bitstream is for '{}', but last build was for '{}'",
                manifest.name, self.name
            );
            return false;
        }
        if manifest.hw_rev != self.hw_rev {
            println!(
                "ERROR: existing bitstream is for hw_rev={}, but last build is for hw_rev={}",
                manifest.hw_rev, self.hw_rev
            );
            return false;
        }
        true
    }

    /// Default option storage size, two flash pages
    pub const fn default_option_storage_size() -> u32 {
        2 * FLASH_PAGE_SZ
    }
}
