// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Tests for the region resolver: address assignment per slot, alignment,
//! overlap and slot containment enforcement, and the manifest rewrite.

use std::fs;

use tempfile::TempDir;

use tiliqua_archive::{Error, check_hw_compat, resolve_regions, target_for};
use tiliqua_manifest::layout::FIRMWARE_BASE_SLOT0;
use tiliqua_manifest::{
    BitstreamManifest, FLASH_PAGE_SZ, MANIFEST_MAGIC, MANIFEST_SIZE, MemoryRegion, RegionType,
    SLOT_SIZE, SlotLayout,
};

fn region(filename: &str, region_type: RegionType, size: u32) -> MemoryRegion {
    MemoryRegion {
        filename: filename.into(),
        region_type,
        spiflash_src: None,
        psram_dst: None,
        size,
        crc: None,
    }
}

fn xip_region(size: u32, spiflash_src: Option<u32>) -> MemoryRegion {
    MemoryRegion {
        filename: "firmware.bin".into(),
        region_type: RegionType::XipFirmware,
        spiflash_src,
        psram_dst: None,
        size,
        crc: None,
    }
}

fn ram_load_region(size: u32) -> MemoryRegion {
    MemoryRegion {
        filename: "firmware.bin".into(),
        region_type: RegionType::RamLoad,
        spiflash_src: None,
        psram_dst: Some(0x200000),
        size,
        crc: None,
    }
}

fn manifest_with(regions: Vec<MemoryRegion>) -> BitstreamManifest {
    BitstreamManifest {
        hw_rev: 4,
        name: "POLYSYN".into(),
        sha: "6a2f9c01".into(),
        brief: String::new(),
        video: String::new(),
        external_pll_config: None,
        regions,
        magic: MANIFEST_MAGIC,
    }
}

// ============================================================================
// Address assignment
// ============================================================================

#[test]
fn resolve_bootloader_archive() {
    let manifest = manifest_with(vec![
        region("top.bit", RegionType::Bitstream, 0x50000),
        xip_region(0x40000, Some(0xB0000)),
        region("manifest.json", RegionType::Manifest, MANIFEST_SIZE),
    ]);
    let layout = target_for(&manifest, None).expect("target");
    assert!(layout.is_bootloader());

    let scratch = TempDir::new().unwrap();
    let (revised, regions) = resolve_regions(&manifest, &layout, scratch.path()).expect("resolve");

    let addrs: Vec<u32> = regions.iter().map(|r| r.addr).collect();
    assert_eq!(addrs, vec![0x000000, 0xB0000, 0xFF000]);
    assert!(revised.regions.iter().all(|r| r.spiflash_src.is_some()));

    // The rewritten manifest in the scratch dir is the concrete one
    let flashed = fs::read(scratch.path().join("manifest.json")).expect("manifest.json");
    let flashed = BitstreamManifest::from_slice(&flashed).expect("parse");
    assert_eq!(flashed, revised);
}

#[test]
fn resolve_user_slot_with_ram_loaded_firmware() {
    let manifest = manifest_with(vec![
        region("top.bit", RegionType::Bitstream, 0x80000),
        ram_load_region(0x30000),
        region("<options>", RegionType::OptionStorage, 0x2000),
        region("manifest.json", RegionType::Manifest, MANIFEST_SIZE),
    ]);
    let layout = target_for(&manifest, Some(0)).expect("target");

    let scratch = TempDir::new().unwrap();
    let (revised, regions) = resolve_regions(&manifest, &layout, scratch.path()).expect("resolve");

    let addrs: Vec<u32> = regions.iter().map(|r| r.addr).collect();
    assert_eq!(addrs, vec![0x100000, 0x1B0000, 0x1FD000, 0x1FF000]);

    // The manifest region lands exactly in the slot's manifest window
    let manifest_region = revised
        .regions
        .iter()
        .find(|r| r.region_type == RegionType::Manifest)
        .unwrap();
    assert_eq!(manifest_region.spiflash_src, Some(layout.manifest_addr()));

    // Everything fits inside slot 0
    for r in &regions {
        assert!(r.addr >= SlotLayout::slot_start_addr(0));
        assert!(r.end_addr() <= SlotLayout::slot_end_addr(0));
    }

    // OptionStorage has no content file to flash
    let options = regions.iter().find(|r| r.path.is_none()).unwrap();
    assert_eq!(options.memory_region.region_type, RegionType::OptionStorage);
}

#[test]
fn ram_load_cursor_advances_page_aligned() {
    let mut second = ram_load_region(0x1000);
    second.filename = "firmware2.bin".into();
    let manifest = manifest_with(vec![ram_load_region(0x2800), second]);
    let layout = target_for(&manifest, Some(0)).expect("target");

    let scratch = TempDir::new().unwrap();
    let (_, regions) = resolve_regions(&manifest, &layout, scratch.path()).expect("resolve");

    assert_eq!(regions[0].addr, FIRMWARE_BASE_SLOT0);
    // 0x2800 rounds up to the next page, so the second image starts 0x3000 in
    assert_eq!(regions[1].addr, FIRMWARE_BASE_SLOT0 + 0x3000);
}

#[test]
fn aligned_size_boundaries() {
    let manifest = manifest_with(vec![
        xip_region(FLASH_PAGE_SZ, Some(0xB0000)),
        MemoryRegion {
            filename: "fw2.bin".into(),
            region_type: RegionType::XipFirmware,
            spiflash_src: Some(0xC0000),
            psram_dst: None,
            size: FLASH_PAGE_SZ + 1,
            crc: None,
        },
    ]);
    let layout = target_for(&manifest, None).expect("target");
    let scratch = TempDir::new().unwrap();
    let (_, regions) = resolve_regions(&manifest, &layout, scratch.path()).expect("resolve");

    assert_eq!(regions[0].aligned_size, FLASH_PAGE_SZ);
    assert_eq!(regions[1].aligned_size, 2 * FLASH_PAGE_SZ);
}

// ============================================================================
// Layout enforcement
// ============================================================================

#[test]
fn overlapping_regions_rejected() {
    let mut second = xip_region(0x2000, Some(0x101000));
    second.filename = "fw2.bin".into();
    let manifest = manifest_with(vec![xip_region(0x2000, Some(0x100000)), second]);
    let layout = target_for(&manifest, None).expect("target");

    let scratch = TempDir::new().unwrap();
    match resolve_regions(&manifest, &layout, scratch.path()) {
        Err(Error::RegionOverlap { a, b, .. }) => {
            assert_eq!(a, "firmware.bin");
            assert_eq!(b, "fw2.bin");
        }
        other => panic!("expected RegionOverlap, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn equal_start_addresses_are_an_overlap() {
    let mut second = xip_region(0x1000, Some(0xB0000));
    second.filename = "fw2.bin".into();
    let manifest = manifest_with(vec![xip_region(0x1000, Some(0xB0000)), second]);
    let layout = target_for(&manifest, None).expect("target");

    let scratch = TempDir::new().unwrap();
    assert!(matches!(
        resolve_regions(&manifest, &layout, scratch.path()),
        Err(Error::RegionOverlap { .. })
    ));
}

#[test]
fn slot_overrun_rejected() {
    // firmware_base for slot 0 leaves SLOT_SIZE - 0xB0000 = 0x50000 bytes;
    // one byte more rounds up past the end of the slot
    let overrun = SLOT_SIZE - (FIRMWARE_BASE_SLOT0 - SlotLayout::slot_start_addr(0));
    let manifest = manifest_with(vec![ram_load_region(overrun + 1)]);
    let layout = target_for(&manifest, Some(0)).expect("target");

    let scratch = TempDir::new().unwrap();
    match resolve_regions(&manifest, &layout, scratch.path()) {
        Err(Error::SlotOverrun { name, end, slot_end, .. }) => {
            assert_eq!(name, "firmware.bin");
            assert!(end > slot_end);
        }
        other => panic!("expected SlotOverrun, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn exact_slot_fit_accepted() {
    let exact = SLOT_SIZE - (FIRMWARE_BASE_SLOT0 - SlotLayout::slot_start_addr(0));
    let manifest = manifest_with(vec![ram_load_region(exact)]);
    let layout = target_for(&manifest, Some(0)).expect("target");

    let scratch = TempDir::new().unwrap();
    let (_, regions) = resolve_regions(&manifest, &layout, scratch.path()).expect("resolve");
    assert_eq!(regions[0].end_addr(), SlotLayout::slot_end_addr(0));
}

#[test]
fn preset_xip_address_must_be_page_aligned() {
    let manifest = manifest_with(vec![xip_region(0x1000, Some(0xB0100))]);
    let layout = target_for(&manifest, None).expect("target");

    let scratch = TempDir::new().unwrap();
    assert!(matches!(
        resolve_regions(&manifest, &layout, scratch.path()),
        Err(Error::Misaligned { addr: 0xB0100, .. })
    ));
}

#[test]
fn xip_without_address_rejected() {
    let manifest = manifest_with(vec![xip_region(0x1000, None)]);
    let layout = target_for(&manifest, None).expect("target");

    let scratch = TempDir::new().unwrap();
    assert!(matches!(
        resolve_regions(&manifest, &layout, scratch.path()),
        Err(Error::Unresolved { .. })
    ));
}

#[test]
fn oversized_revised_manifest_rejected() {
    let mut manifest = manifest_with(vec![region("top.bit", RegionType::Bitstream, 0x1000)]);
    manifest.brief = "x".repeat(MANIFEST_SIZE as usize);
    let layout = target_for(&manifest, Some(0)).expect("target");

    let scratch = TempDir::new().unwrap();
    assert!(matches!(
        resolve_regions(&manifest, &layout, scratch.path()),
        Err(Error::Manifest(tiliqua_manifest::Error::TooLarge { .. }))
    ));
}

// ============================================================================
// Pre-checks
// ============================================================================

#[test]
fn hardware_mismatch_rejected() {
    let manifest = manifest_with(vec![]);
    match check_hw_compat(&manifest, 3) {
        Err(Error::HardwareMismatch { archive, device }) => {
            assert_eq!(archive, 4);
            assert_eq!(device, 3);
        }
        other => panic!("expected HardwareMismatch, got {:?}", other),
    }
    assert!(check_hw_compat(&manifest, 4).is_ok());
}

#[test]
fn bootloader_archive_refuses_user_slot() {
    let manifest = manifest_with(vec![xip_region(0x1000, Some(0xB0000))]);
    assert!(matches!(
        target_for(&manifest, Some(0)),
        Err(Error::SlotForBootloader)
    ));
}

#[test]
fn user_archive_requires_slot() {
    let manifest = manifest_with(vec![region("top.bit", RegionType::Bitstream, 0x1000)]);
    assert!(matches!(target_for(&manifest, None), Err(Error::SlotRequired)));
}

#[test]
fn slot_out_of_range_rejected() {
    let manifest = manifest_with(vec![region("top.bit", RegionType::Bitstream, 0x1000)]);
    assert!(matches!(
        target_for(&manifest, Some(8)),
        Err(Error::Manifest(tiliqua_manifest::Error::SlotOutOfRange { slot: 8 }))
    ));
}
