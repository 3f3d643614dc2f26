// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Drives `openFPGALoader` to program Tiliqua bitstream archives into SPI
//! flash slots and to read back what each slot currently holds.

pub mod commands;
pub mod programmer;
pub mod status;

pub use commands::FlashPlan;
pub use programmer::{DetectedDevice, Programmer, detect_tiliqua};
