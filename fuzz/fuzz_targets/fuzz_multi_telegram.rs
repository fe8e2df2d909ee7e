#![no_main]

use libfuzzer_sys::fuzz_target;
use mbus_master::payload::log_event::parse_log_records;
use mbus_master::payload::record::{parse_records, parse_variable_data};
use mbus_master::payload::value::interpret_record;
use mbus_master::LogType;

fuzz_target!(|data: &[u8]| {
    let block = parse_variable_data(data, 0x01);
    assert_eq!(block.more_records_follow, data.last() == Some(&0x1F));

    for record in &block.records {
        let _ = interpret_record(record);
    }
    let _ = parse_log_records(&block.records, LogType::Alarm);

    // Records split across telegrams: every chunk parses independently
    for chunk in data.chunks(32) {
        let (records, _) = parse_records(chunk);
        let _ = parse_log_records(&records, LogType::Warning);
    }
});
