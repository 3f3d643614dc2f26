// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Invokes the external `openFPGALoader` programmer and parses its USB scan
//! output to find an attached Tiliqua debugger.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use log::debug;

/// External programmer binary, expected on PATH
pub const PROGRAMMER_BIN: &str = "openFPGALoader";
/// Cable identifier of the on-board RP2040 debugger
pub const DEFAULT_CABLE: &str = "dirtyJtag";

/// USB strings the RP2040 debugger firmware reports
const VENDOR_MARKERS: [&str; 2] = ["apfbug", "apf.audio"];
const PRODUCT_PREFIX: &str = "tiliqua r";

/// Handle on the external programmer, configured for one cable
#[derive(Debug, Clone)]
pub struct Programmer {
    cable: String,
}

impl Programmer {
    pub fn new(cable: &str) -> Self {
        Self {
            cable: cable.to_string(),
        }
    }

    pub fn cable(&self) -> &str {
        &self.cable
    }

    /// Run `--scan-usb` and return the raw device table.
    pub fn scan_usb(&self) -> Result<String> {
        let output = Command::new(PROGRAMMER_BIN)
            .arg("--scan-usb")
            .output()
            .with_context(|| format!("failed to run {} (is it installed?)", PROGRAMMER_BIN))?;
        if !output.status.success() {
            bail!("{} --scan-usb exited with {}", PROGRAMMER_BIN, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Dump `size` bytes of SPI flash starting at `offset` into `out`.
    pub fn dump_flash(&self, offset: u32, size: u32, skip_reset: bool, out: &Path) -> Result<()> {
        let mut cmd = Command::new(PROGRAMMER_BIN);
        cmd.args(["-c", &self.cable, "--dump-flash", "-o"])
            .arg(format!("{:#x}", offset))
            .args(["--file-size", &size.to_string()]);
        if skip_reset {
            cmd.arg("--skip-reset");
        }
        cmd.arg(out);
        debug!("running {:?}", cmd);
        let status = cmd
            .status()
            .with_context(|| format!("failed to run {}", PROGRAMMER_BIN))?;
        if !status.success() {
            bail!("{} --dump-flash exited with {}", PROGRAMMER_BIN, status);
        }
        Ok(())
    }
}

/// A Tiliqua debugger found on the USB bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDevice {
    /// 16 hex digit USB serial
    pub serial: String,
    /// Major hardware revision from the product string (`Tiliqua R<n>`)
    pub hw_rev: u32,
}

fn is_vendor_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    VENDOR_MARKERS.iter().any(|m| lower.contains(m))
}

fn parse_device_line(line: &str) -> Option<DetectedDevice> {
    // Serials are 16 upper-case hex digits
    let serial = line
        .split_whitespace()
        .find(|t| t.len() == 16 && t.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)))?
        .to_string();

    let lower = line.to_lowercase();
    let product_at = lower.find(PRODUCT_PREFIX)?;
    let digits: String = line[product_at + PRODUCT_PREFIX.len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let hw_rev = digits.parse().ok()?;

    Some(DetectedDevice { serial, hw_rev })
}

/// Parse a `--scan-usb` table, returning the first Tiliqua debugger entry.
pub fn parse_scan_output(output: &str) -> Option<DetectedDevice> {
    output
        .lines()
        .filter(|line| is_vendor_line(line))
        .find_map(parse_device_line)
}

/// Scan the USB bus for an attached Tiliqua and return its details.
pub fn detect_tiliqua(programmer: &Programmer) -> Result<DetectedDevice> {
    println!("Scan for Tiliqua...");
    let output = programmer.scan_usb()?;
    print!("{}", output);

    if let Some(device) = parse_scan_output(&output) {
        println!(
            "Found attached Tiliqua! (hw_rev={}, serial={})",
            device.hw_rev, device.serial
        );
        return Ok(device);
    }
    if output.lines().any(is_vendor_line) {
        bail!("found a Tiliqua-like device, but its product string is malformed (update the RP2040 firmware?)");
    }
    bail!(
        "could not find a Tiliqua debugger - check it is turned on, plugged into the 'dbg' port, \
         permissions are correct, and the RP2040 firmware is up to date"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN_OUTPUT: &str = "\
Bus device vid:pid       probe type      manufacturer    serial               product
001 004    0x1209:0x5bf0 dirtyJtag       apf.audio       91A3C5E0074B2D1F     Tiliqua R4
001 002    0x0403:0x6010 FTDI2232        FTDI            FT1ABC12             Dual RS232-HS
";

    #[test]
    fn parses_scan_table() {
        let device = parse_scan_output(SCAN_OUTPUT).expect("device");
        assert_eq!(device.serial, "91A3C5E0074B2D1F");
        assert_eq!(device.hw_rev, 4);
    }

    #[test]
    fn ignores_other_probes() {
        let output = "001 002 0x0403:0x6010 FTDI2232 FTDI FT1ABC12 Dual RS232-HS\n";
        assert_eq!(parse_scan_output(output), None);
    }

    #[test]
    fn malformed_product_string() {
        let output = "001 004 0x1209:0x5bf0 dirtyJtag apfbug 91A3C5E0074B2D1F Tiliqua\n";
        assert_eq!(parse_scan_output(output), None);
    }

    #[test]
    fn missing_serial() {
        let output = "001 004 0x1209:0x5bf0 dirtyJtag apfbug none Tiliqua R4\n";
        assert_eq!(parse_scan_output(output), None);
    }
}
