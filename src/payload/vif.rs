//! Value information lookup.
//!
//! Maps a record's VIF (and, for the 0xFD / 0xFF extension tables, its first
//! VIFE) to a unit, a multiplier and a quantity name. Anything not in the
//! table has multiplier 1 and an empty unit.

use crate::constants::{MBUS_DIB_VIF_EXTENSION_FD, MBUS_DIB_VIF_MANUFACTURER_FF};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VifInfo {
    pub unit: &'static str,
    pub exponent: f64,
    pub quantity: &'static str,
}

impl VifInfo {
    const fn new(unit: &'static str, exponent: f64, quantity: &'static str) -> Self {
        Self {
            unit,
            exponent,
            quantity,
        }
    }
}

/// Fallback for unknown value information.
pub const VIF_UNKNOWN: VifInfo = VifInfo::new("", 1.0, "Unknown");

fn lookup_primary_vif(vif: u8) -> Option<VifInfo> {
    match vif {
        0x84 => Some(VifInfo::new("kWh", 0.01, "Energy")),
        0xA9 => Some(VifInfo::new("W", 0.01, "Power")),
        _ => None,
    }
}

fn lookup_vife_fd(code: u8) -> Option<VifInfo> {
    match code {
        0xC8 => Some(VifInfo::new("V", 0.1, "Voltage")),
        0xD9 => Some(VifInfo::new("A", 0.001, "Current")),
        0x8E => Some(VifInfo::new("", 1.0, "Firmware version")),
        _ => None,
    }
}

fn lookup_vife_ff(code: u8) -> Option<VifInfo> {
    match code {
        0xD9 => Some(VifInfo::new("Hz", 0.01, "Frequency")),
        0xE0 => Some(VifInfo::new("", 0.001, "Power factor")),
        0x98 | 0xAA => Some(VifInfo::new("", 1.0, "Manufacturer specific")),
        _ => None,
    }
}

/// Looks up the value information for a VIF and its VIFE list.
pub fn lookup_vif(vif: u8, vifes: &[u8]) -> VifInfo {
    let found = match (vif, vifes.first()) {
        (MBUS_DIB_VIF_EXTENSION_FD, Some(&code)) => lookup_vife_fd(code),
        (MBUS_DIB_VIF_MANUFACTURER_FF, Some(&code)) => lookup_vife_ff(code),
        (MBUS_DIB_VIF_EXTENSION_FD | MBUS_DIB_VIF_MANUFACTURER_FF, None) => None,
        (primary, _) => lookup_primary_vif(primary),
    };
    found.unwrap_or(VIF_UNKNOWN)
}
