//! # Variable Data Records
//!
//! Parsing of the user data carried by an RSP_UD long frame with CI = 0x72:
//! a 12-byte fixed data header followed by a stream of self-describing data
//! records (DIF, DIFEs, VIF, VIFEs, value).
//!
//! A malformed record stops the parse for that telegram. Records parsed before
//! it are kept, and the "more records follow" flag is still taken from the
//! last payload byte.

use crate::constants::*;
use crate::error::{MBusError, Result};
use crate::payload::data_encoding::{bcd_to_string, decode_bcd};
use log::warn;
use nom::{
    bytes::complete::take,
    number::complete::{be_u16, be_u8, le_u16},
    sequence::tuple,
    IResult,
};
use std::fmt;

/// Value length selected by the low nibble of a DIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLength {
    /// The value occupies exactly this many bytes.
    Fixed(usize),
    /// LVAR: the next byte holds the length of the value that follows.
    Variable,
}

/// Maps a DIF to the length of its value field.
pub fn mbus_dif_datalength_lookup(dif: u8) -> DataLength {
    match dif & MBUS_DATA_RECORD_DIF_MASK_DATA {
        0x0 => DataLength::Fixed(0),
        0x1 => DataLength::Fixed(1),
        0x2 => DataLength::Fixed(2),
        0x3 => DataLength::Fixed(3),
        0x4 => DataLength::Fixed(4),
        0x5 => DataLength::Fixed(4),
        0x6 => DataLength::Fixed(6),
        0x7 => DataLength::Fixed(8),
        0x8 => DataLength::Fixed(0),
        0x9 => DataLength::Fixed(1),
        0xA => DataLength::Fixed(2),
        0xB => DataLength::Fixed(3),
        0xC => DataLength::Fixed(4),
        0xD => DataLength::Variable,
        0xE => DataLength::Fixed(6),
        _ => DataLength::Fixed(0),
    }
}

/// True for the DIF codes that end the record stream.
pub fn is_record_terminator(byte: u8) -> bool {
    matches!(
        byte,
        MBUS_DIB_DIF_MANUFACTURER_SPECIFIC | MBUS_DIB_DIF_MORE_RECORDS_FOLLOW | MBUS_DIB_DIF_IDLE_FILLER
    )
}

/// One variable data record, exactly as transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataRecord {
    pub dif: u8,
    pub difes: Vec<u8>,
    pub vif: u8,
    pub vifes: Vec<u8>,
    pub data: Vec<u8>,
}

impl DataRecord {
    /// Coding of the value: the low nibble of the DIF.
    pub fn data_field(&self) -> u8 {
        self.dif & MBUS_DATA_RECORD_DIF_MASK_DATA
    }
}

impl fmt::Display for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DIF=0x{:02X}", self.dif)?;
        if !self.difes.is_empty() {
            write!(f, ", DIFEs=[{}]", hex_list(&self.difes))?;
        }
        write!(f, ", VIF=0x{:02X}", self.vif)?;
        if !self.vifes.is_empty() {
            write!(f, ", VIFEs=[{}]", hex_list(&self.vifes))?;
        }
        let data: Vec<String> = self.data.iter().map(|b| format!("{b:02X}")).collect();
        write!(f, ", Data=[{}]", data.join(" "))
    }
}

fn hex_list(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("0x{b:02X}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// The fixed data header at the start of a variable data response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedHeader {
    /// Identification number decoded from 8 BCD digits.
    pub identification_number: u32,
    /// The same number in its canonical 8-digit form.
    pub identification_number_str: String,
    /// Manufacturer code, read high byte first.
    pub manufacturer: u16,
    pub version: u8,
    pub medium: u8,
    pub access_number: u8,
    pub status: u8,
    pub signature: u16,
    /// Address field of the frame the header arrived in.
    pub frame_address: u8,
}

impl fmt::Display for FixedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID: {} ({}), Manu: {:04X}, Ver: {:02X}, Medium: {:02X}, Access#: {}, Status: {:02X}",
            self.identification_number_str,
            self.identification_number,
            self.manufacturer,
            self.version,
            self.medium,
            self.access_number,
            self.status
        )
    }
}

/// Result of parsing the user data of one variable data response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableDataBlock {
    pub fixed_header: Option<FixedHeader>,
    pub records: Vec<DataRecord>,
    pub more_records_follow: bool,
    /// Set when a record could not be parsed and the remainder was dropped.
    pub truncated: bool,
}

fn fixed_header_fields(input: &[u8]) -> IResult<&[u8], (&[u8], u16, u8, u8, u8, u8, u16)> {
    tuple((take(4usize), be_u16, be_u8, be_u8, be_u8, be_u8, le_u16))(input)
}

/// Parses the 12-byte fixed data header.
///
/// An identification number that is not valid BCD is a format error.
pub fn parse_fixed_header(input: &[u8], frame_address: u8) -> Result<FixedHeader> {
    let (_, (id, manufacturer, version, medium, access_number, status, signature)) =
        fixed_header_fields(input)
            .map_err(|_| MBusError::Structure("fixed data header too short".to_string()))?;

    let identification_number = decode_bcd(id)? as u32;

    Ok(FixedHeader {
        identification_number,
        identification_number_str: bcd_to_string(id),
        manufacturer,
        version,
        medium,
        access_number,
        status,
        signature,
        frame_address,
    })
}

fn extension_chain(mut input: &[u8], first: u8, extension_bit: u8) -> IResult<&[u8], Vec<u8>> {
    let mut extensions = Vec::new();
    let mut last = first;
    while last & extension_bit != 0 {
        let (rest, byte) = be_u8(input)?;
        extensions.push(byte);
        last = byte;
        input = rest;
    }
    Ok((input, extensions))
}

/// Parses one data record.
///
/// Returns `None` when a terminator appears where the VIF should be.
pub fn parse_variable_record(input: &[u8]) -> IResult<&[u8], Option<DataRecord>> {
    let (input, dif) = be_u8(input)?;
    let (input, difes) = extension_chain(input, dif, MBUS_DIB_DIF_EXTENSION_BIT)?;

    if input.first().copied().is_some_and(is_record_terminator) {
        return Ok((input, None));
    }

    let (input, vif) = be_u8(input)?;
    let (input, vifes) = extension_chain(input, vif, MBUS_DIB_VIF_EXTENSION_BIT)?;

    let (input, data) = match mbus_dif_datalength_lookup(dif) {
        DataLength::Fixed(len) => take(len)(input)?,
        DataLength::Variable => {
            let (input, lvar) = be_u8(input)?;
            take(lvar)(input)?
        }
    };

    Ok((
        input,
        Some(DataRecord {
            dif,
            difes,
            vif,
            vifes,
            data: data.to_vec(),
        }),
    ))
}

/// Parses the record stream until a terminator or the end of the buffer.
///
/// The second value is false when a malformed record cut the stream short.
pub fn parse_records(mut input: &[u8]) -> (Vec<DataRecord>, bool) {
    let mut records = Vec::new();

    while let Some(&first) = input.first() {
        if is_record_terminator(first) {
            break;
        }
        match parse_variable_record(input) {
            Ok((rest, Some(record))) => {
                records.push(record);
                input = rest;
            }
            Ok((_, None)) => break,
            Err(_) => {
                warn!(
                    "Malformed data record after {} records ({} bytes left), dropping remainder",
                    records.len(),
                    input.len()
                );
                return (records, false);
            }
        }
    }

    (records, true)
}

/// Parses the user data of a variable data response.
pub fn parse_variable_data(user_data: &[u8], frame_address: u8) -> VariableDataBlock {
    let more_records_follow = user_data.last() == Some(&MBUS_DIB_DIF_MORE_RECORDS_FOLLOW);

    if user_data.len() < MBUS_DATA_VARIABLE_HEADER_LENGTH {
        return VariableDataBlock {
            more_records_follow,
            ..Default::default()
        };
    }

    let (header, body) = user_data.split_at(MBUS_DATA_VARIABLE_HEADER_LENGTH);
    let fixed_header = match parse_fixed_header(header, frame_address) {
        Ok(h) => Some(h),
        Err(e) => {
            warn!("Discarding fixed data header: {e}");
            None
        }
    };

    let (records, complete) = parse_records(body);

    VariableDataBlock {
        fixed_header,
        records,
        more_records_follow,
        truncated: !complete,
    }
}
