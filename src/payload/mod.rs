//! The payload module contains the components responsible for decoding and processing
//! the user data of M-Bus variable data responses.

pub mod data_encoding;
pub mod header;
pub mod log_event;
pub mod record;
pub mod value;
pub mod vif;

pub use data_encoding::*;
pub use header::{ReadableFixedHeader, StatusFlags};
pub use log_event::{parse_log_records, EventClass, LogEvent, LogParseOutcome, LogType};
pub use record::*;
pub use value::{interpret_record, MBusReadResult, MBusRecordValue};
pub use vif::{lookup_vif, VifInfo};
