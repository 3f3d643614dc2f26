// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Turns a resolved region list into an ordered sequence of programmer write
//! commands, and runs it.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tempfile::NamedTempFile;

use tiliqua_archive::FlashableRegion;
use tiliqua_manifest::RegionType;

use crate::programmer::{PROGRAMMER_BIN, Programmer};

/// One programmer write: a file to a flash offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashCommand {
    pub offset: u32,
    pub path: PathBuf,
    pub skip_reset: bool,
}

impl FlashCommand {
    /// Full argv for this write
    pub fn to_argv(&self, cable: &str) -> Vec<String> {
        let mut argv = vec![
            PROGRAMMER_BIN.to_string(),
            "-c".to_string(),
            cable.to_string(),
            "-f".to_string(),
            "-o".to_string(),
            format!("{:#x}", self.offset),
            "--file-type".to_string(),
            "raw".to_string(),
        ];
        if self.skip_reset {
            argv.push("--skip-reset".to_string());
        }
        argv.push(self.path.display().to_string());
        argv
    }
}

/// An ordered flashing session: writes in ascending address order, with the
/// device reset exactly once, after the final write.
///
/// Option storage regions have no content file; when the caller asks for them
/// to be erased the plan owns a temporary all-`0xFF` image per region, which
/// is removed again when the plan is dropped.
#[derive(Debug)]
pub struct FlashPlan {
    commands: Vec<FlashCommand>,
    _erase_files: Vec<NamedTempFile>,
}

impl FlashPlan {
    /// Build the write sequence for `regions`.
    pub fn generate(regions: &[FlashableRegion], erase_option_storage: bool) -> Result<Self> {
        let mut sorted: Vec<&FlashableRegion> = regions.iter().collect();
        sorted.sort_by_key(|r| r.addr);

        let mut commands = Vec::new();
        let mut erase_files = Vec::new();
        for region in sorted {
            let path = match region.memory_region.region_type {
                RegionType::OptionStorage => {
                    if !erase_option_storage {
                        continue;
                    }
                    // openFPGALoader has no erase command, so write the
                    // erased flash state explicitly
                    let mut file = tempfile::Builder::new()
                        .suffix(".erase.bin")
                        .tempfile()
                        .context("failed to create erase image")?;
                    file.write_all(&vec![0xffu8; region.memory_region.size as usize])?;
                    file.flush()?;
                    let path = file.path().to_path_buf();
                    erase_files.push(file);
                    path
                }
                _ => region
                    .path
                    .clone()
                    .with_context(|| {
                        format!("region '{}' has no content file", region.memory_region.filename)
                    })?,
            };
            commands.push(FlashCommand {
                offset: region.addr,
                path,
                skip_reset: false,
            });
        }

        // Reset the device once, after the last write
        let n = commands.len();
        for command in commands.iter_mut().take(n.saturating_sub(1)) {
            command.skip_reset = true;
        }

        Ok(Self {
            commands,
            _erase_files: erase_files,
        })
    }

    pub fn commands(&self) -> &[FlashCommand] {
        &self.commands
    }

    /// Print every command line about to run.
    pub fn preview(&self, cable: &str) {
        println!("\nThe following commands will be executed:");
        for command in &self.commands {
            println!("\t$ {}", command.to_argv(cable).join(" "));
        }
    }

    /// Run the sequence. Any failing command aborts it; earlier writes stay
    /// on the device.
    pub fn execute(&self, programmer: &Programmer) -> Result<()> {
        println!("\nExecuting flash commands...");
        for command in &self.commands {
            let argv = command.to_argv(programmer.cable());
            let status = Command::new(&argv[0])
                .args(&argv[1..])
                .status()
                .with_context(|| format!("failed to run {}", PROGRAMMER_BIN))?;
            if !status.success() {
                bail!(
                    "flash command for offset {:#x} exited with {}",
                    command.offset,
                    status
                );
            }
        }
        println!("\nFlashing completed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiliqua_manifest::MemoryRegion;

    fn flashable(
        filename: &str,
        region_type: RegionType,
        addr: u32,
        size: u32,
    ) -> FlashableRegion {
        FlashableRegion {
            memory_region: MemoryRegion {
                filename: filename.into(),
                region_type: region_type.clone(),
                spiflash_src: Some(addr),
                psram_dst: None,
                size,
                crc: None,
            },
            addr,
            aligned_size: size.next_multiple_of(0x1000),
            path: match region_type {
                RegionType::OptionStorage => None,
                _ => Some(PathBuf::from(filename)),
            },
        }
    }

    #[test]
    fn commands_in_address_order_with_single_reset() {
        // Deliberately unsorted input
        let regions = vec![
            flashable("manifest.json", RegionType::Manifest, 0xFF000, 0x1000),
            flashable("top.bit", RegionType::Bitstream, 0x000000, 0x50000),
            flashable("firmware.bin", RegionType::XipFirmware, 0xB0000, 0x40000),
        ];
        let plan = FlashPlan::generate(&regions, false).unwrap();
        let offsets: Vec<u32> = plan.commands().iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0x000000, 0xB0000, 0xFF000]);

        let skip_resets: Vec<bool> = plan.commands().iter().map(|c| c.skip_reset).collect();
        assert_eq!(skip_resets, vec![true, true, false]);
    }

    #[test]
    fn single_command_never_skips_reset() {
        let regions = vec![flashable("top.bit", RegionType::Bitstream, 0x100000, 0x1000)];
        let plan = FlashPlan::generate(&regions, false).unwrap();
        assert_eq!(plan.commands().len(), 1);
        assert!(!plan.commands()[0].skip_reset);
    }

    #[test]
    fn option_storage_skipped_by_default() {
        let regions = vec![
            flashable("top.bit", RegionType::Bitstream, 0x100000, 0x1000),
            flashable("<options>", RegionType::OptionStorage, 0x1FD000, 0x2000),
        ];
        let plan = FlashPlan::generate(&regions, false).unwrap();
        assert_eq!(plan.commands().len(), 1);
        assert_eq!(plan.commands()[0].offset, 0x100000);
    }

    #[test]
    fn option_storage_erased_on_request() {
        let regions = vec![
            flashable("top.bit", RegionType::Bitstream, 0x100000, 0x1000),
            flashable("<options>", RegionType::OptionStorage, 0x1FD000, 0x2000),
        ];
        let plan = FlashPlan::generate(&regions, true).unwrap();
        assert_eq!(plan.commands().len(), 2);

        // Erase image exists, holds `size` bytes of 0xFF, and is removed
        // again when the plan goes away
        let erase_path = plan.commands()[1].path.clone();
        let data = std::fs::read(&erase_path).unwrap();
        assert_eq!(data.len(), 0x2000);
        assert!(data.iter().all(|&b| b == 0xff));

        drop(plan);
        assert!(!erase_path.exists());
    }

    #[test]
    fn argv_shape() {
        let command = FlashCommand {
            offset: 0xB0000,
            path: PathBuf::from("firmware.bin"),
            skip_reset: true,
        };
        assert_eq!(
            command.to_argv("dirtyJtag"),
            vec![
                "openFPGALoader",
                "-c",
                "dirtyJtag",
                "-f",
                "-o",
                "0xb0000",
                "--file-type",
                "raw",
                "--skip-reset",
                "firmware.bin",
            ]
        );
    }
}
