// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Reads back and decodes the manifest window of every slot.

use std::fs;

use anyhow::Result;
use tempfile::NamedTempFile;

use tiliqua_manifest::{BitstreamManifest, Error, MANIFEST_SIZE, N_MANIFESTS, SlotLayout};

use crate::programmer::Programmer;

/// What a slot's manifest window turned out to contain
#[derive(Debug)]
pub enum SlotStatus {
    /// Erased flash, nothing installed
    Empty,
    /// A parseable manifest
    Valid(Box<BitstreamManifest>),
    /// Data that is not a manifest; holds the first bytes for inspection
    Unrecognized(Vec<u8>),
}

pub fn classify_window(window: &[u8]) -> SlotStatus {
    match BitstreamManifest::from_flash_bytes(window) {
        Ok(manifest) => SlotStatus::Valid(Box::new(manifest)),
        Err(Error::Erased) => SlotStatus::Empty,
        Err(_) => SlotStatus::Unrecognized(window[..window.len().min(32)].to_vec()),
    }
}

/// Dump each slot's manifest window and report its contents. A failed read
/// for one slot does not stop the remaining slots; only the final read
/// resets the device.
pub fn flash_status(programmer: &Programmer) -> Result<()> {
    println!("Reading manifests from flash...");
    for slot in 0..N_MANIFESTS {
        let layout = SlotLayout::for_user_slot(slot)?;
        let offset = layout.manifest_addr();
        let is_last = slot == N_MANIFESTS - 1;

        println!("\nSlot {} manifest at {:#x}:", slot, offset);
        let dump = NamedTempFile::new()?;
        if let Err(e) = programmer.dump_flash(offset, MANIFEST_SIZE, !is_last, dump.path()) {
            println!("  error reading flash: {:#}", e);
            continue;
        }
        let window = fs::read(dump.path())?;

        match classify_window(&window) {
            SlotStatus::Empty => println!("  status: empty (all 0xFF)"),
            SlotStatus::Valid(manifest) => {
                println!("  status: valid manifest");
                for line in manifest.to_string().lines() {
                    println!("  {}", line);
                }
            }
            SlotStatus::Unrecognized(head) => {
                println!("  status: data is there, but does not look like a manifest");
                println!("  first {} bytes: {}", head.len(), hex::encode(&head));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiliqua_manifest::MANIFEST_MAGIC;

    #[test]
    fn classifies_erased_window() {
        let window = vec![0xffu8; MANIFEST_SIZE as usize];
        assert!(matches!(classify_window(&window), SlotStatus::Empty));
    }

    #[test]
    fn classifies_valid_manifest() {
        let manifest = BitstreamManifest {
            hw_rev: 4,
            name: "XBEAM".into(),
            sha: "deadbeef".into(),
            brief: String::new(),
            video: String::new(),
            external_pll_config: None,
            regions: vec![],
            magic: MANIFEST_MAGIC,
        };
        let mut window = manifest.to_json_bytes().unwrap();
        window.resize(MANIFEST_SIZE as usize, 0xff);
        match classify_window(&window) {
            SlotStatus::Valid(parsed) => assert_eq!(parsed.name, "XBEAM"),
            other => panic!("expected Valid, got {:?}", other),
        }
    }

    #[test]
    fn classifies_garbage() {
        let mut window = vec![0x42u8; 64];
        window.resize(MANIFEST_SIZE as usize, 0xff);
        match classify_window(&window) {
            SlotStatus::Unrecognized(head) => assert_eq!(head.len(), 32),
            other => panic!("expected Unrecognized, got {:?}", other),
        }
    }
}
