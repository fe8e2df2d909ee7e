//! # Record Value Interpretation
//!
//! Turns a parsed [`DataRecord`] into a typed physical value. The DIF low nibble
//! selects the coding, the VIF/VIFE table in [`crate::payload::vif`] supplies
//! unit and multiplier.
//!
//! Decoding failures never escape as errors here: a record whose value cannot
//! be decoded yields [`MBusReadResult::NotFound`] with the reason.

use crate::payload::data_encoding::{decode_ascii, decode_bcd, decode_float, decode_int};
use crate::payload::record::DataRecord;
use crate::payload::vif::lookup_vif;
use std::fmt;

/// A decoded record value.
#[derive(Debug, Clone, PartialEq)]
pub enum MBusRecordValue {
    /// Integer or BCD value with no scaling applied.
    Integer(i64),
    /// Value after a non-unit multiplier, or an IEEE float.
    Numeric(f64),
    String(String),
}

impl MBusRecordValue {
    /// The value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MBusRecordValue::Integer(v) => Some(*v as f64),
            MBusRecordValue::Numeric(v) => Some(*v),
            MBusRecordValue::String(_) => None,
        }
    }
}

impl fmt::Display for MBusRecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MBusRecordValue::Integer(v) => write!(f, "{v}"),
            MBusRecordValue::Numeric(v) => write!(f, "{v}"),
            MBusRecordValue::String(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Outcome of a value lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum MBusReadResult {
    Found {
        value: MBusRecordValue,
        unit: String,
        quantity: &'static str,
        /// Last VIFE of the matched record; selects the sub-quantity of an
        /// extension VIF.
        last_vife: Option<u8>,
    },
    NotFound {
        reason: String,
    },
}

impl MBusReadResult {
    pub fn not_found(reason: impl Into<String>) -> Self {
        MBusReadResult::NotFound {
            reason: reason.into(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, MBusReadResult::Found { .. })
    }

    pub fn value(&self) -> Option<&MBusRecordValue> {
        match self {
            MBusReadResult::Found { value, .. } => Some(value),
            MBusReadResult::NotFound { .. } => None,
        }
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            MBusReadResult::Found { unit, .. } => Some(unit),
            MBusReadResult::NotFound { .. } => None,
        }
    }

    /// Name of the measured quantity, e.g. "Energy".
    pub fn quantity(&self) -> Option<&'static str> {
        match self {
            MBusReadResult::Found { quantity, .. } => Some(quantity),
            MBusReadResult::NotFound { .. } => None,
        }
    }

    pub fn last_vife(&self) -> Option<u8> {
        match self {
            MBusReadResult::Found { last_vife, .. } => *last_vife,
            MBusReadResult::NotFound { .. } => None,
        }
    }
}

impl fmt::Display for MBusReadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MBusReadResult::Found {
                value,
                unit,
                last_vife,
                ..
            } => {
                write!(f, "Found: true, Value: {value}")?;
                if !unit.is_empty() {
                    write!(f, " {unit}")?;
                }
                if let Some(vife) = last_vife {
                    write!(f, ", LastVIFE: 0x{vife:02X}")?;
                }
                Ok(())
            }
            MBusReadResult::NotFound { reason } => write!(f, "Found: false, Error: {reason}"),
        }
    }
}

fn require(data: &[u8], len: usize) -> Option<&[u8]> {
    data.get(..len)
}

/// Decodes the raw value of a record without scaling.
///
/// Returns `Err` with a reason when the buffer is too short or the value is
/// not decodable.
fn decode_raw_value(record: &DataRecord) -> Result<MBusRecordValue, String> {
    let data = record.data.as_slice();
    let short = |len: usize| {
        format!(
            "Data too short for DIF 0x{:02X}: need {len} bytes, have {}",
            record.dif,
            data.len()
        )
    };

    let int_of = |len: usize| -> Result<MBusRecordValue, String> {
        let bytes = require(data, len).ok_or_else(|| short(len))?;
        decode_int(bytes)
            .map(MBusRecordValue::Integer)
            .map_err(|e| e.to_string())
    };
    let bcd_of = |len: usize| -> Result<MBusRecordValue, String> {
        let bytes = require(data, len).ok_or_else(|| short(len))?;
        let value = decode_bcd(bytes).map_err(|e| e.to_string())?;
        i64::try_from(value)
            .map(MBusRecordValue::Integer)
            .map_err(|e| e.to_string())
    };

    match record.data_field() {
        0x0 => Err("DIF indicates no data".to_string()),
        0x1 => int_of(1),
        0x2 => int_of(2),
        0x3 => int_of(3),
        0x4 => int_of(4),
        0x5 => {
            let bytes = require(data, 4).ok_or_else(|| short(4))?;
            decode_float(bytes)
                .map(|v| MBusRecordValue::Numeric(f64::from(v)))
                .map_err(|e| e.to_string())
        }
        0x6 => int_of(6),
        0x7 => int_of(8),
        0x9 => bcd_of(1),
        0xA => bcd_of(2),
        0xB => bcd_of(3),
        0xC => bcd_of(4),
        0xE => bcd_of(6),
        0xD => {
            let text = decode_ascii(data);
            if text.is_empty() {
                Err("Empty variable length string".to_string())
            } else {
                Ok(MBusRecordValue::String(text))
            }
        }
        _ => data
            .first()
            .map(|&b| MBusRecordValue::Integer(i64::from(b)))
            .ok_or_else(|| short(1)),
    }
}

/// Interprets a data record into a value with unit and multiplier applied.
pub fn interpret_record(record: &DataRecord) -> MBusReadResult {
    let raw = match decode_raw_value(record) {
        Ok(value) => value,
        Err(reason) => return MBusReadResult::not_found(reason),
    };

    let info = lookup_vif(record.vif, &record.vifes);
    let value = match raw {
        MBusRecordValue::Integer(v) if info.exponent != 1.0 => {
            MBusRecordValue::Numeric(v as f64 * info.exponent)
        }
        MBusRecordValue::Numeric(v) => MBusRecordValue::Numeric(v * info.exponent),
        other => other,
    };

    MBusReadResult::Found {
        value,
        unit: info.unit.to_string(),
        quantity: info.quantity,
        last_vife: record.vifes.last().copied(),
    }
}
