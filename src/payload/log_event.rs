//! # Meter Log Events
//!
//! Meters answer a log read request with data records grouped in triples:
//! event id, timestamp and duration. This module matches those triples and
//! turns them into [`LogEvent`]s.

use crate::payload::data_encoding::{bcd_to_string, decode_bcd};
use crate::payload::record::DataRecord;
use crate::payload::value::{interpret_record, MBusReadResult, MBusRecordValue};
use log::warn;
use std::fmt;

/// Log selected by the last byte of the log read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogType {
    Error = 0x2E,
    Alarm = 0x30,
    Warning = 0x32,
}

impl LogType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogType::Error => "Error",
            LogType::Alarm => "Alarm",
            LogType::Warning => "Warning",
        };
        f.write_str(name)
    }
}

/// Class of an event id, by numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Alarm,
    Warning,
    Error,
    Unknown,
}

impl EventClass {
    pub fn classify(event_id: i64) -> Self {
        match event_id {
            2013..=2043 => EventClass::Alarm,
            1000..=1030 => EventClass::Warning,
            40..=53 => EventClass::Error,
            _ => EventClass::Unknown,
        }
    }

    pub fn describe(self, event_id: i64) -> String {
        match self {
            EventClass::Alarm => format!("ALARM (ID: {event_id})"),
            EventClass::Warning => format!("WARNING (ID: {event_id})"),
            EventClass::Error => format!("ERROR (ID: {event_id})"),
            EventClass::Unknown => "Unknown Event".to_string(),
        }
    }
}

/// Timestamp text when the meter sent no usable time.
pub const TIMESTAMP_NOT_AVAILABLE: &str = "Not available";

#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub log_type: LogType,
    pub record_number: u8,
    pub event_id: i64,
    pub class: EventClass,
    pub description: String,
    /// Raw BCD timestamp as 12 hex digits, or "Not available".
    pub timestamp: String,
    pub duration_seconds: i64,
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Log Event [{} - Record {}] - ID: {} ({}), Timestamp: {}, Duration: {}s",
            self.log_type,
            self.record_number,
            self.event_id,
            self.description,
            self.timestamp,
            self.duration_seconds
        )
    }
}

/// Events parsed from one telegram's records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogParseOutcome {
    pub events: Vec<LogEvent>,
    /// An event id could not be decoded; the log read must stop here.
    pub aborted: bool,
}

fn is_id_record(record: &DataRecord) -> bool {
    record.dif == 0x02 && record.vif == 0xFF && record.vifes.first() == Some(&0xF9)
}

fn is_time_record(record: &DataRecord) -> bool {
    record.dif == 0x0E && record.vif == 0xED
}

fn is_duration_record(record: &DataRecord) -> bool {
    record.dif == 0x04 && record.vif == 0xA0
}

fn integer_value(result: &MBusReadResult) -> Option<i64> {
    match result.value()? {
        MBusRecordValue::Integer(v) => Some(*v),
        MBusRecordValue::Numeric(v) => Some(*v as i64),
        MBusRecordValue::String(_) => None,
    }
}

fn timestamp_of(record: &DataRecord) -> String {
    match decode_bcd(&record.data) {
        Ok(value) if value > 0 => bcd_to_string(&record.data),
        _ => TIMESTAMP_NOT_AVAILABLE.to_string(),
    }
}

/// Groups records into (id, timestamp, duration) triples.
///
/// Triples whose signatures do not match are skipped. Trailing records that
/// do not fill a triple are ignored.
pub fn parse_log_records(records: &[DataRecord], log_type: LogType) -> LogParseOutcome {
    let mut outcome = LogParseOutcome::default();

    for triple in records.chunks_exact(3) {
        let (id, time, duration) = (&triple[0], &triple[1], &triple[2]);
        if !(is_id_record(id) && is_time_record(time) && is_duration_record(duration)) {
            continue;
        }

        let event_id = match integer_value(&interpret_record(id)) {
            Some(v) => v,
            None => {
                warn!("Undecodable log event id in record {id}, stopping log read");
                outcome.aborted = true;
                break;
            }
        };

        let class = EventClass::classify(event_id);
        outcome.events.push(LogEvent {
            log_type,
            record_number: id.vifes.get(4).copied().unwrap_or(0),
            event_id,
            class,
            description: class.describe(event_id),
            timestamp: timestamp_of(time),
            duration_seconds: integer_value(&interpret_record(duration)).unwrap_or(0),
        });
    }

    outcome
}
