// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Assigns concrete SPI flash addresses to a manifest's regions for a chosen
//! slot, and enforces the layout invariants before anything is flashed:
//! page alignment, no overlaps, and (for user slots) slot containment.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use tiliqua_manifest::layout::align_to_page;
use tiliqua_manifest::{BitstreamManifest, MemoryRegion, RegionType, SlotLayout};

use crate::builder::MANIFEST_NAME;
use crate::{Error, Result};

/// A memory region with its flash address fixed, ready to flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashableRegion {
    /// Source region, `spiflash_src` now populated
    pub memory_region: MemoryRegion,
    /// Absolute SPI flash address
    pub addr: u32,
    /// Size rounded up to the flash page boundary
    pub aligned_size: u32,
    /// Content file in the extracted archive; `None` for content-less regions
    pub path: Option<PathBuf>,
}

impl FlashableRegion {
    /// End address (exclusive), page aligned
    pub fn end_addr(&self) -> u32 {
        self.addr + self.aligned_size
    }
}

impl fmt::Display for FlashableRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}):\n  start: {:#x}\n  end:   {:#x}",
            self.memory_region.filename,
            self.memory_region.region_type,
            self.addr,
            self.end_addr() - 1
        )
    }
}

fn has_xip_firmware(manifest: &BitstreamManifest) -> bool {
    manifest
        .regions
        .iter()
        .any(|r| r.region_type == RegionType::XipFirmware)
}

/// Refuse to flash an archive built for a different board generation.
pub fn check_hw_compat(manifest: &BitstreamManifest, device_hw_rev: u32) -> Result<()> {
    if manifest.hw_rev != device_hw_rev {
        return Err(Error::HardwareMismatch {
            archive: manifest.hw_rev,
            device: device_hw_rev,
        });
    }
    Ok(())
}

/// Work out the target slot layout, rejecting slot misuse: bootloader
/// archives only ever go to the bootloader slot, user archives need a slot.
pub fn target_for(manifest: &BitstreamManifest, slot: Option<u32>) -> Result<SlotLayout> {
    match (has_xip_firmware(manifest), slot) {
        (true, Some(_)) => Err(Error::SlotForBootloader),
        (true, None) => Ok(SlotLayout::for_bootloader()),
        (false, None) => Err(Error::SlotRequired),
        (false, Some(slot)) => Ok(SlotLayout::for_user_slot(slot)?),
    }
}

/// Assign flash addresses to every region of `manifest` for `layout`,
/// validate the resulting plan, and rewrite `manifest.json` in the extracted
/// archive so the document flashed to the device carries the concrete
/// addresses the bootloader will read.
///
/// Returns the revised manifest and the regions to flash, ordered by
/// ascending address.
pub fn resolve_regions(
    manifest: &BitstreamManifest,
    layout: &SlotLayout,
    extract_dir: &Path,
) -> Result<(BitstreamManifest, Vec<FlashableRegion>)> {
    let mut revised = manifest.clone();
    // RamLoad images are packed upwards from the slot's firmware base, each
    // rounded up to a fresh page
    let mut firmware_cursor: Option<u32> = None;
    let mut regions = Vec::with_capacity(revised.regions.len());

    for region in revised.regions.iter_mut() {
        let addr = match region.region_type {
            RegionType::Bitstream => layout.bitstream_addr(),
            RegionType::Manifest => layout.manifest_addr(),
            RegionType::OptionStorage => layout.options_base(),
            RegionType::XipFirmware => {
                // Address was fixed when the archive was built
                region.spiflash_src.ok_or_else(|| Error::Unresolved {
                    name: region.filename.clone(),
                })?
            }
            RegionType::RamLoad => {
                let cursor = match firmware_cursor {
                    Some(cursor) => cursor,
                    None => layout.firmware_base()?,
                };
                firmware_cursor = Some(align_to_page(cursor + region.size));
                cursor
            }
        };
        debug!("region '{}': spiflash_src {:#x}", region.filename, addr);
        region.spiflash_src = Some(addr);
        regions.push(FlashableRegion {
            memory_region: region.clone(),
            addr,
            aligned_size: align_to_page(region.size),
            path: match region.region_type {
                RegionType::OptionStorage => None,
                _ => Some(extract_dir.join(&region.filename)),
            },
        });
    }
    regions.sort_by_key(|r| r.addr);

    check_alignment(&regions)?;
    check_overlaps(&regions)?;
    if let Some(slot) = layout.slot_number() {
        check_slot_bounds(&regions, slot)?;
    }

    // The flashed manifest must match what the bootloader will read, so
    // rewrite the extracted copy with the concrete addresses. This also
    // re-checks the manifest still fits its flash window.
    fs::write(extract_dir.join(MANIFEST_NAME), revised.to_json_bytes()?)?;

    Ok((revised, regions))
}

fn check_alignment(regions: &[FlashableRegion]) -> Result<()> {
    for region in regions {
        if region.addr % tiliqua_manifest::FLASH_PAGE_SZ != 0 {
            return Err(Error::Misaligned {
                name: region.memory_region.filename.clone(),
                addr: region.addr,
            });
        }
    }
    Ok(())
}

fn check_overlaps(regions: &[FlashableRegion]) -> Result<()> {
    // Sorted by address; adjacent pairs suffice. Equal start addresses are
    // always an overlap since sizes are positive.
    for pair in regions.windows(2) {
        if pair[0].end_addr() > pair[1].addr {
            return Err(Error::RegionOverlap {
                a: pair[0].memory_region.filename.clone(),
                a_end: pair[0].end_addr(),
                b: pair[1].memory_region.filename.clone(),
                b_start: pair[1].addr,
            });
        }
    }
    Ok(())
}

fn check_slot_bounds(regions: &[FlashableRegion], slot: u32) -> Result<()> {
    let slot_start = SlotLayout::slot_start_addr(slot);
    let slot_end = SlotLayout::slot_end_addr(slot);
    for region in regions {
        if region.addr < slot_start || region.end_addr() > slot_end {
            return Err(Error::SlotOverrun {
                name: region.memory_region.filename.clone(),
                start: region.addr,
                end: region.end_addr(),
                slot,
                slot_end,
            });
        }
    }
    Ok(())
}
