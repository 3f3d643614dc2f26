// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SPI flash addressing for the bootloader slot and the user slots.

use crate::{Error, FLASH_PAGE_SZ, MANIFEST_SIZE, N_MANIFESTS, SLOT_BITSTREAM_BASE, SLOT_SIZE};

/// Bootloader bitstream lives at the very start of flash
pub const BOOTLOADER_BITSTREAM_ADDR: u32 = 0x000000;
/// Firmware image base for user slot 0; subsequent slots are `SLOT_SIZE` apart
pub const FIRMWARE_BASE_SLOT0: u32 = 0x1B0000;
/// Option storage base; user slot S stores options at `(1+S) * SLOT_SIZE` above this
pub const OPTIONS_BASE_ADDR: u32 = 0xFD000;

/// Round `value` up to the next flash page boundary
pub const fn align_to_page(value: u32) -> u32 {
    (value + FLASH_PAGE_SZ - 1) & !(FLASH_PAGE_SZ - 1)
}

/// Flash addressing for one target: the bootloader slot (`slot_number: None`)
/// or a user slot in `0..N_MANIFESTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    slot_number: Option<u32>,
}

impl SlotLayout {
    pub const fn for_bootloader() -> Self {
        Self { slot_number: None }
    }

    pub fn for_user_slot(slot: u32) -> Result<Self, Error> {
        if slot >= N_MANIFESTS {
            return Err(Error::SlotOutOfRange { slot });
        }
        Ok(Self {
            slot_number: Some(slot),
        })
    }

    pub const fn is_bootloader(&self) -> bool {
        self.slot_number.is_none()
    }

    pub const fn slot_number(&self) -> Option<u32> {
        self.slot_number
    }

    pub fn bitstream_addr(&self) -> u32 {
        match self.slot_number {
            None => BOOTLOADER_BITSTREAM_ADDR,
            Some(slot) => Self::slot_start_addr(slot),
        }
    }

    /// The manifest occupies the last `MANIFEST_SIZE` bytes of its slot. The
    /// bootloader's own manifest sits just below the first user slot.
    pub fn manifest_addr(&self) -> u32 {
        match self.slot_number {
            None => SLOT_BITSTREAM_BASE - MANIFEST_SIZE,
            Some(_) => self.bitstream_addr() + SLOT_SIZE - MANIFEST_SIZE,
        }
    }

    pub fn firmware_base(&self) -> Result<u32, Error> {
        match self.slot_number {
            None => Err(Error::NoFirmwareBase),
            Some(slot) => Ok(FIRMWARE_BASE_SLOT0 + slot * SLOT_SIZE),
        }
    }

    pub fn options_base(&self) -> u32 {
        match self.slot_number {
            None => OPTIONS_BASE_ADDR,
            Some(slot) => OPTIONS_BASE_ADDR + (1 + slot) * SLOT_SIZE,
        }
    }

    pub const fn slot_start_addr(slot: u32) -> u32 {
        SLOT_BITSTREAM_BASE + slot * SLOT_SIZE
    }

    pub const fn slot_end_addr(slot: u32) -> u32 {
        Self::slot_start_addr(slot) + SLOT_SIZE
    }

    pub const fn slot_from_addr(addr: u32) -> u32 {
        (addr - SLOT_BITSTREAM_BASE) / SLOT_SIZE
    }
}
