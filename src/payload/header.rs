//! Readable form of the fixed data header.
//!
//! Resolves the manufacturer code against a small table of known meter
//! manufacturers, the medium byte to its name, and the status byte to the
//! named condition flags of EN 13757-3.

use crate::payload::data_encoding::mbus_decode_manufacturer;
use crate::payload::record::FixedHeader;
use bitflags::bitflags;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

bitflags! {
    /// Status byte of the fixed data header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const METER_BUSY = 0x01;
        const INTERNAL_ERROR = 0x02;
        const POWER_LOW = 0x04;
        const PERMANENT_ERROR = 0x08;
        const TEMPORARY_ERROR = 0x10;
        const INSTALLATION_ERROR = 0x20;
    }
}

const STATUS_NAMES: [(StatusFlags, &str); 6] = [
    (StatusFlags::METER_BUSY, "Meter busy"),
    (StatusFlags::INTERNAL_ERROR, "Internal error"),
    (StatusFlags::POWER_LOW, "Power low"),
    (StatusFlags::PERMANENT_ERROR, "Permanent error"),
    (StatusFlags::TEMPORARY_ERROR, "Temporary error"),
    (StatusFlags::INSTALLATION_ERROR, "Installation error"),
];

/// Names of the conditions set in a status byte.
///
/// A non-zero byte with none of the known bits set yields a single
/// "Unknown status bits set" entry.
pub fn decode_status(status: u8) -> Vec<&'static str> {
    let flags = StatusFlags::from_bits_truncate(status);
    let mut names: Vec<&'static str> = STATUS_NAMES
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() && status != 0 {
        names.push("Unknown status bits set");
    }
    names
}

/// Name of a medium code.
pub fn medium_name(medium: u8) -> String {
    let name = match medium {
        0x00 => "Other",
        0x01 => "Oil",
        0x02 => "Electricity",
        0x03 => "Gas",
        0x04 => "Heat (Outlet)",
        0x05 => "Steam",
        0x06 => "Hot Water",
        0x07 => "Water",
        0x08 => "Heat Cost Allocator",
        other => return format!("Unknown (Code: 0x{other:02X})"),
    };
    name.to_string()
}

/// Known manufacturers keyed by FLAG association id.
static KNOWN_MANUFACTURERS: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(0x0442, "ABB");
    map.insert(0x2C2D, "Kamstrup");
    map.insert(0x32A7, "Landis+Gyr");
    map.insert(0x1593, "Elster");
    map.insert(0x4CAE, "Sensus");
    map.insert(0x14C5, "Engelmann");
    map.insert(0x4493, "Qundis");
    map.insert(0x2324, "Diehl Metering (Hydrometer)");
    map.insert(0x5068, "Techem");
    map
});

/// Header manufacturer fields are read high byte first, so the FLAG id is
/// the byte-swapped value.
fn flag_id(manufacturer: u16) -> u16 {
    manufacturer.swap_bytes()
}

/// Display name for a header manufacturer code.
pub fn manufacturer_name(manufacturer: u16) -> String {
    KNOWN_MANUFACTURERS
        .get(&flag_id(manufacturer))
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("Unknown (Code: {manufacturer:04X})"))
}

/// The fixed data header with every code resolved for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadableFixedHeader {
    pub serial_number: String,
    pub serial_number_numeric: u32,
    /// Raw manufacturer code as 4 hex digits.
    pub manufacturer_code: String,
    /// Three-letter FLAG code.
    pub manufacturer_id: String,
    pub manufacturer_name: String,
    pub version: u8,
    pub medium_code: u8,
    pub medium_type: String,
    pub access_number: u8,
    pub status_raw_hex: String,
    pub status: StatusFlags,
    pub status_decoded: Vec<&'static str>,
    pub signature: u16,
    pub frame_address: u8,
}

impl From<&FixedHeader> for ReadableFixedHeader {
    fn from(header: &FixedHeader) -> Self {
        ReadableFixedHeader {
            serial_number: header.identification_number_str.clone(),
            serial_number_numeric: header.identification_number,
            manufacturer_code: format!("{:04X}", header.manufacturer),
            manufacturer_id: mbus_decode_manufacturer(flag_id(header.manufacturer)),
            manufacturer_name: manufacturer_name(header.manufacturer),
            version: header.version,
            medium_code: header.medium,
            medium_type: medium_name(header.medium),
            access_number: header.access_number,
            status_raw_hex: format!("0x{:02X}", header.status),
            status: StatusFlags::from_bits_truncate(header.status),
            status_decoded: decode_status(header.status),
            signature: header.signature,
            frame_address: header.frame_address,
        }
    }
}

impl fmt::Display for ReadableFixedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.status_decoded.is_empty() {
            "OK".to_string()
        } else {
            self.status_decoded.join(", ")
        };
        writeln!(f, "Serial number:  {}", self.serial_number)?;
        writeln!(
            f,
            "Manufacturer:   {} ({}, code {})",
            self.manufacturer_name, self.manufacturer_id, self.manufacturer_code
        )?;
        writeln!(f, "Version:        {}", self.version)?;
        writeln!(f, "Medium:         {} (0x{:02X})", self.medium_type, self.medium_code)?;
        writeln!(f, "Access number:  {}", self.access_number)?;
        writeln!(f, "Status:         {} [{}]", self.status_raw_hex, status)?;
        writeln!(f, "Signature:      0x{:04X}", self.signature)?;
        write!(f, "Frame address:  {}", self.frame_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(manufacturer: u16, medium: u8, status: u8) -> FixedHeader {
        FixedHeader {
            identification_number: 12345678,
            identification_number_str: "12345678".to_string(),
            manufacturer,
            version: 1,
            medium,
            access_number: 0,
            status,
            signature: 0x1234,
            frame_address: 5,
        }
    }

    #[test]
    fn test_status_decoding() {
        assert_eq!(decode_status(0x0C), vec!["Power low", "Permanent error"]);
        assert!(decode_status(0x00).is_empty());
        assert_eq!(decode_status(0x80), vec!["Unknown status bits set"]);
        assert_eq!(decode_status(0x41), vec!["Meter busy"]);
    }

    #[test]
    fn test_medium_names() {
        assert_eq!(medium_name(0x02), "Electricity");
        assert_eq!(medium_name(0x08), "Heat Cost Allocator");
        assert_eq!(medium_name(0x1B), "Unknown (Code: 0x1B)");
    }

    #[test]
    fn test_manufacturer_table() {
        assert_eq!(manufacturer_name(0x4204), "ABB");
        assert_eq!(manufacturer_name(0x2D2C), "Kamstrup");
        assert_eq!(manufacturer_name(0xBEEF), "Unknown (Code: BEEF)");
    }

    #[test]
    fn test_readable_header() {
        let readable = ReadableFixedHeader::from(&header(0x4204, 0x02, 0x0C));
        assert_eq!(readable.serial_number, "12345678");
        assert_eq!(readable.manufacturer_code, "4204");
        assert_eq!(readable.manufacturer_id, "ABB");
        assert_eq!(readable.manufacturer_name, "ABB");
        assert_eq!(readable.medium_type, "Electricity");
        assert_eq!(readable.status_raw_hex, "0x0C");
        assert_eq!(
            readable.status,
            StatusFlags::POWER_LOW | StatusFlags::PERMANENT_ERROR
        );
        assert!(readable.to_string().contains("Power low, Permanent error"));
    }
}
