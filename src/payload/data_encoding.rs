//! # M-Bus Data Encoding and Decoding
//!
//! This module provides functions for encoding and decoding the value codings
//! used in variable data records: little-endian BCD, signed integers of
//! 1/2/3/4/6/8 bytes, 32-bit IEEE floats and byte-reversed ASCII.

use crate::error::{MBusError, Result};
use nom::{
    number::complete::{le_f32, le_i16, le_i24, le_i32, le_i64, le_i8},
    IResult,
};

/// Decodes a little-endian binary-coded decimal value (least significant byte first).
///
/// Fails with `MBusError::Format` when a nibble is not a decimal digit or the
/// value cannot fit a `u64`.
pub fn decode_bcd(input: &[u8]) -> Result<u64> {
    if input.len() > 8 {
        return Err(MBusError::Format(format!(
            "BCD value of {} bytes does not fit 64 bits",
            input.len()
        )));
    }

    let mut value = 0u64;
    for (idx, &byte) in input.iter().enumerate().rev() {
        let high = byte >> 4;
        let low = byte & 0x0F;
        if high > 9 || low > 9 {
            return Err(MBusError::Format(format!(
                "Invalid BCD byte 0x{byte:02X} at index {idx}"
            )));
        }
        value = value * 100 + u64::from(high) * 10 + u64::from(low);
    }

    Ok(value)
}

/// Encodes `value` as little-endian BCD in exactly `length` bytes.
pub fn encode_bcd(mut value: u64, length: usize) -> Result<Vec<u8>> {
    let mut result = vec![0u8; length];

    for byte in result.iter_mut() {
        let ones = (value % 10) as u8;
        value /= 10;
        let tens = (value % 10) as u8;
        value /= 10;
        *byte = (tens << 4) | ones;
    }

    if value != 0 {
        return Err(MBusError::Format(format!(
            "value does not fit {length} BCD bytes"
        )));
    }
    Ok(result)
}

/// Renders BCD bytes as their decimal digits, most significant first.
///
/// No digit validation is done; invalid nibbles come out as hex letters.
pub fn bcd_to_string(input: &[u8]) -> String {
    let reversed: Vec<u8> = input.iter().rev().copied().collect();
    hex::encode_upper(reversed)
}

/// Decodes a little-endian two's complement integer of 1, 2, 3, 4, 6 or 8 bytes.
///
/// 3- and 6-byte values are sign-extended from their top bit.
pub fn decode_int(input: &[u8]) -> Result<i64> {
    let parsed: IResult<&[u8], i64> = match input.len() {
        1 => le_i8(input).map(|(rest, v)| (rest, i64::from(v))),
        2 => le_i16(input).map(|(rest, v)| (rest, i64::from(v))),
        3 => le_i24(input).map(|(rest, v)| (rest, i64::from(v))),
        4 => le_i32(input).map(|(rest, v)| (rest, i64::from(v))),
        6 => return Ok(decode_i48(input)),
        8 => le_i64(input),
        n => {
            return Err(MBusError::Format(format!(
                "Invalid integer size: expected 1, 2, 3, 4, 6 or 8 bytes, got {n}"
            )))
        }
    };
    parsed
        .map(|(_, v)| v)
        .map_err(|e| MBusError::Format(format!("integer decode failed: {e:?}")))
}

fn decode_i48(input: &[u8]) -> i64 {
    let mut raw = 0i64;
    for (i, &b) in input.iter().take(6).enumerate() {
        raw |= i64::from(b) << (i * 8);
    }
    // Sign-extend from bit 47
    (raw << 16) >> 16
}

/// Decodes a little-endian IEEE 754 single precision float.
pub fn decode_float(input: &[u8]) -> Result<f32> {
    if input.len() != 4 {
        return Err(MBusError::Format(format!(
            "Invalid float size: expected 4 bytes, got {}",
            input.len()
        )));
    }
    le_f32::<_, nom::error::Error<&[u8]>>(input)
        .map(|(_, v)| v)
        .map_err(|e| MBusError::Format(format!("float decode failed: {e:?}")))
}

/// Decodes a variable-length ASCII string; M-Bus transmits it last character first.
///
/// Leading and trailing NUL padding is stripped.
pub fn decode_ascii(input: &[u8]) -> String {
    let text: String = input.iter().rev().map(|&b| b as char).collect();
    text.trim_matches('\0').to_string()
}

/// Decodes a FLAG association manufacturer id into its three-letter code.
pub fn mbus_decode_manufacturer(id: u16) -> String {
    let mut id = u32::from(id);
    let mut manufacturer = String::with_capacity(3);

    manufacturer.push(char::from_u32(((id / (32 * 32)) & 0x1F) + 64).unwrap_or('?'));
    id %= 32 * 32;
    manufacturer.push(char::from_u32((id / 32) + 64).unwrap_or('?'));
    id %= 32;
    manufacturer.push(char::from_u32(id + 64).unwrap_or('?'));

    manufacturer
}
