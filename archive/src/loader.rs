// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Opens bitstream archives into a scratch directory.

use std::fs::{self, File};
use std::path::Path;

use flate2::read::GzDecoder;
use log::debug;
use tempfile::TempDir;

use tiliqua_manifest::{BitstreamManifest, RegionType};

use crate::builder::MANIFEST_NAME;
use crate::{Error, Result};

/// A bitstream archive unpacked into a temporary directory.
///
/// The directory lives as long as the loader; dropping the loader removes it
/// again, on every exit path. Callers flash straight out of
/// [`extract_dir`](Self::extract_dir), so the loader must outlive the
/// flashing session.
#[derive(Debug)]
pub struct ArchiveLoader {
    manifest: BitstreamManifest,
    tmpdir: TempDir,
}

impl ArchiveLoader {
    /// Extract `archive_path` and parse its manifest.
    pub fn open(archive_path: &Path) -> Result<Self> {
        let tmpdir = tempfile::Builder::new().prefix("tiliqua-archive-").tempdir()?;
        debug!(
            "extracting {} to {}",
            archive_path.display(),
            tmpdir.path().display()
        );

        let gz = GzDecoder::new(File::open(archive_path)?);
        tar::Archive::new(gz)
            .unpack(tmpdir.path())
            .map_err(|e| Error::ArchiveCorrupt(e.to_string()))?;

        let manifest_path = tmpdir.path().join(MANIFEST_NAME);
        if !manifest_path.exists() {
            return Err(Error::ManifestMissing);
        }
        let manifest = BitstreamManifest::from_slice(&fs::read(&manifest_path)?)?;

        Ok(Self { manifest, tmpdir })
    }

    pub fn manifest(&self) -> &BitstreamManifest {
        &self.manifest
    }

    /// Scratch directory holding the extracted archive contents
    pub fn extract_dir(&self) -> &Path {
        self.tmpdir.path()
    }

    /// Bootloader archives carry XiP firmware; user bitstreams never do
    pub fn is_bootloader_archive(&self) -> bool {
        self.manifest
            .regions
            .iter()
            .any(|r| r.region_type == RegionType::XipFirmware)
    }
}
