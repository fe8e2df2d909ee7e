//! Master session tests over an in-memory link.

use mbus_master::error::MBusError;
use mbus_master::mbus::frame::pack_long_frame;
use mbus_master::mbus::mbus_protocol::{
    response_checksum, ExchangeState, FrameControlBit, MBusMaster,
};
use mbus_master::mbus::serial::SerialConfig;
use mbus_master::mbus::serial_mock::MockSerialPort;
use mbus_master::constants::MBUS_MAX_TELEGRAMS_PER_SESSION;
use mbus_master::{EventClass, LogType, MBusRecordValue};
use std::time::Duration;

const ADDRESS: u8 = 0x05;

fn test_config() -> SerialConfig {
    SerialConfig {
        read_timeout_ms: 50,
        ack_timeout_ms: 20,
        write_ack_timeout_ms: 50,
        inter_telegram_delay_ms: 0,
        init_retry_delay_ms: 0,
        ..SerialConfig::default()
    }
}

fn master_with(port: &MockSerialPort) -> MBusMaster<MockSerialPort> {
    MBusMaster::with_port(port.clone(), test_config())
}

/// Fixed data header with the given BCD id bytes (little-endian).
fn header(id: [u8; 4]) -> Vec<u8> {
    let mut ud = id.to_vec();
    ud.extend_from_slice(&[0x42, 0x04, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00]);
    ud
}

fn short_frames(tx: &[u8]) -> Vec<Vec<u8>> {
    tx.chunks(5).map(|c| c.to_vec()).collect()
}

fn assert_close(value: Option<&MBusRecordValue>, expected: f64) {
    let v = value.and_then(MBusRecordValue::as_f64).unwrap();
    assert!((v - expected).abs() < 1e-9, "{v} != {expected}");
}

#[tokio::test]
async fn test_three_telegram_read_is_reassembled() {
    let port = MockSerialPort::new();

    let mut t1 = header([0x78, 0x56, 0x34, 0x12]);
    t1.extend_from_slice(&[0x04, 0x84, 0x00, 0x64, 0x00, 0x00, 0x00, 0x1F]);
    let mut t2 = header([0x21, 0x43, 0x65, 0x87]);
    t2.extend_from_slice(&[0x02, 0xFD, 0xC8, 0x05, 0xE6, 0x08, 0x1F]);
    let mut t3 = header([0x11, 0x11, 0x11, 0x11]);
    t3.extend_from_slice(&[0x02, 0xFF, 0xD9, 0x00, 0x88, 0x13]);

    let mut expected_checksum = 0;
    for ud in [&t1, &t2, &t3] {
        let raw = pack_long_frame(0x08, ADDRESS, 0x72, ud).unwrap();
        expected_checksum += response_checksum(&raw);
        port.queue_rx_data(&raw);
    }

    let mut master = master_with(&port);
    let (ok, checksum) = master.request_and_cache_all(ADDRESS).await.unwrap();
    assert!(ok);
    assert_eq!(checksum, expected_checksum);
    assert_eq!(port.pending_rx(), 0);

    let records = master.cache().records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].vif, 0x84);
    assert_eq!(records[1].vifes, vec![0xC8, 0x05]);
    assert_eq!(records[2].vifes, vec![0xD9, 0x00]);

    // Header comes from the first telegram only
    let header = master.get_fixed_header(ADDRESS).unwrap();
    assert_eq!(header.serial_number, "12345678");
    assert_eq!(header.manufacturer_name, "ABB");

    let energy = master.read_value(ADDRESS, 0x04, 0x84, &[], &[]);
    assert_close(energy.value(), 1.0);
    assert_eq!(energy.unit(), Some("kWh"));

    let voltage = master.read_value(ADDRESS, 0x02, 0xFD, &[], &[0xC8]);
    assert_close(voltage.value(), 227.8);
    assert_eq!(voltage.last_vife(), Some(0x05));

    let frequency = master.read_value(ADDRESS, 0x02, 0xFF, &[], &[0xD9]);
    assert_close(frequency.value(), 50.0);
    assert_eq!(frequency.unit(), Some("Hz"));
}

#[tokio::test]
async fn test_fcb_alternates_across_telegrams() {
    let port = MockSerialPort::new();
    for last in [0x1F, 0x1F, 0x00] {
        let mut ud = header([0x78, 0x56, 0x34, 0x12]);
        ud.push(last);
        port.queue_variable_response(ADDRESS, &ud).unwrap();
    }

    let mut master = master_with(&port);
    assert!(master.request_and_cache_all(ADDRESS).await.unwrap().0);

    let requests = short_frames(&port.get_tx_data());
    assert_eq!(
        requests,
        vec![
            vec![0x10, 0x7B, ADDRESS, 0x80, 0x16],
            vec![0x10, 0x5B, ADDRESS, 0x60, 0x16],
            vec![0x10, 0x7B, ADDRESS, 0x80, 0x16],
        ]
    );
    assert_eq!(master.frame_control_bit(), FrameControlBit::Zero);
    assert_eq!(master.last_exchange_state(), ExchangeState::Decoded);
}

#[tokio::test]
async fn test_initialize_without_ack_sends_three_times() {
    let port = MockSerialPort::new();
    let mut master = master_with(&port);

    let acked = master
        .initialize_device(ADDRESS, 3, Duration::from_millis(10), Duration::ZERO)
        .await
        .unwrap();
    assert!(!acked);

    let tx = port.get_tx_data();
    assert_eq!(tx.len(), 15);
    for frame in short_frames(&tx) {
        assert_eq!(frame, vec![0x10, 0x40, ADDRESS, 0x45, 0x16]);
    }
    assert_eq!(master.frame_control_bit(), FrameControlBit::One);
    assert_eq!(master.last_exchange_state(), ExchangeState::TimedOut);
}

#[tokio::test]
async fn test_initialize_stops_at_first_ack() {
    let port = MockSerialPort::new();
    port.queue_ack();
    let mut master = master_with(&port);

    assert!(master.initialize(ADDRESS).await.unwrap());
    assert_eq!(port.get_tx_data().len(), 5);
    assert_eq!(master.frame_control_bit(), FrameControlBit::One);
}

#[tokio::test]
async fn test_initialize_with_scripted_link() {
    let link = tokio_test::io::Builder::new()
        .write(&[0x10, 0x40, ADDRESS, 0x45, 0x16])
        .read(&[0xE5])
        .build();
    let mut master = MBusMaster::with_port(link, test_config());
    assert!(master.initialize(ADDRESS).await.unwrap());
}

#[tokio::test]
async fn test_closed_link_is_reported() {
    let mut master: MBusMaster<MockSerialPort> = MBusMaster::new(test_config());
    assert!(!master.is_open());

    let err = master.initialize(ADDRESS).await.unwrap_err();
    assert!(matches!(err, MBusError::LinkNotOpen));
    assert!(err.is_precondition());

    let err = master.request_and_cache_all(ADDRESS).await.unwrap_err();
    assert!(matches!(err, MBusError::LinkNotOpen));

    let err = master.send_user_data(ADDRESS, 0x51, &[0x01]).await.unwrap_err();
    assert!(matches!(err, MBusError::LinkNotOpen));
}

#[tokio::test]
async fn test_oversized_payload_rejected_before_sending() {
    let port = MockSerialPort::new();
    let mut master = master_with(&port);

    let err = master
        .send_user_data(ADDRESS, 0x51, &[0u8; 253])
        .await
        .unwrap_err();
    assert!(matches!(err, MBusError::PayloadTooLarge(253)));
    assert!(port.get_tx_data().is_empty());
}

#[tokio::test]
async fn test_send_user_data_toggles_fcb_on_ack() {
    let port = MockSerialPort::new();
    port.queue_ack();
    let mut master = master_with(&port);

    assert!(master.send_user_data(ADDRESS, 0x51, &[0x01, 0x02]).await.unwrap());
    assert_eq!(
        port.get_tx_data(),
        pack_long_frame(0x53, ADDRESS, 0x51, &[0x01, 0x02]).unwrap()
    );
    assert_eq!(master.frame_control_bit(), FrameControlBit::One);

    // No ACK this time: the bit stays
    port.clear();
    assert!(!master.send_user_data(ADDRESS, 0x51, &[0x03]).await.unwrap());
    assert_eq!(
        port.get_tx_data(),
        pack_long_frame(0x73, ADDRESS, 0x51, &[0x03]).unwrap()
    );
    assert_eq!(master.frame_control_bit(), FrameControlBit::One);
}

#[tokio::test]
async fn test_send_user_data_invalidates_cache() {
    let port = MockSerialPort::new();
    let mut ud = header([0x78, 0x56, 0x34, 0x12]);
    ud.extend_from_slice(&[0x01, 0x93, 0x00, 0x07]);
    port.queue_variable_response(ADDRESS, &ud).unwrap();
    port.queue_ack();

    let mut master = master_with(&port);
    assert!(master.request_and_cache_all(ADDRESS).await.unwrap().0);
    let volume = master.read_value(ADDRESS, 0x01, 0x93, &[], &[]);
    assert_eq!(volume.value(), Some(&MBusRecordValue::Integer(7)));
    assert_eq!(volume.to_string(), "Found: true, Value: 7, LastVIFE: 0x00");

    assert!(master.send_user_data(ADDRESS, 0x51, &[0x00]).await.unwrap());
    assert!(!master.cache().is_valid());
    assert!(master.get_fixed_header(ADDRESS).is_none());
}

#[tokio::test]
async fn test_read_value_before_read() {
    let port = MockSerialPort::new();
    let master = master_with(&port);

    let result = master.read_value(ADDRESS, 0x04, 0x84, &[], &[]);
    assert!(!result.is_found());
    assert_eq!(
        result.to_string(),
        "Found: false, Error: Data not cached for address 5. Read all telegrams first."
    );
}

#[tokio::test]
async fn test_read_value_for_other_address() {
    let port = MockSerialPort::new();
    let mut ud = header([0x78, 0x56, 0x34, 0x12]);
    ud.extend_from_slice(&[0x04, 0x84, 0x00, 0x64, 0x00, 0x00, 0x00]);
    port.queue_variable_response(ADDRESS, &ud).unwrap();

    let mut master = master_with(&port);
    assert!(master.request_and_cache_all(ADDRESS).await.unwrap().0);

    assert!(!master.read_value(ADDRESS + 1, 0x04, 0x84, &[], &[]).is_found());
    assert!(master.get_fixed_header(ADDRESS + 1).is_none());

    let missing = master.read_value(ADDRESS, 0x04, 0x85, &[], &[]);
    assert_eq!(
        missing.to_string(),
        "Found: false, Error: Matching record not found in cached data."
    );
}

#[tokio::test]
async fn test_no_response_is_a_failed_read() {
    let port = MockSerialPort::new();
    let mut master = master_with(&port);

    assert_eq!(master.request_and_cache_all(ADDRESS).await.unwrap(), (false, 0));
    assert_eq!(master.last_exchange_state(), ExchangeState::TimedOut);
    assert!(!master.cache().is_valid());
}

#[tokio::test]
async fn test_bad_checksum_ends_read() {
    let port = MockSerialPort::new();
    let mut good = header([0x78, 0x56, 0x34, 0x12]);
    good.extend_from_slice(&[0x01, 0x13, 0x07, 0x1F]);
    port.queue_variable_response(ADDRESS, &good).unwrap();

    let mut corrupt =
        pack_long_frame(0x08, ADDRESS, 0x72, &header([0x11, 0x11, 0x11, 0x11])).unwrap();
    let cs = corrupt.len() - 2;
    corrupt[cs] ^= 0xFF;
    port.queue_rx_data(&corrupt);

    let mut master = master_with(&port);
    let (ok, _) = master.request_and_cache_all(ADDRESS).await.unwrap();

    // The first telegram is kept
    assert!(ok);
    assert_eq!(master.cache().records().len(), 1);
    assert_eq!(master.last_exchange_state(), ExchangeState::Malformed);
}

#[tokio::test]
async fn test_non_variable_response_ends_read() {
    let port = MockSerialPort::new();
    port.queue_ack();

    let mut master = master_with(&port);
    assert_eq!(master.request_and_cache_all(ADDRESS).await.unwrap(), (false, 0));
    // An ACK is no RSP_UD: the bit is not toggled
    assert_eq!(master.frame_control_bit(), FrameControlBit::One);
}

#[tokio::test]
async fn test_zero_id_header_is_not_kept() {
    let port = MockSerialPort::new();
    let mut ud = header([0x00, 0x00, 0x00, 0x00]);
    ud.extend_from_slice(&[0x01, 0x13, 0x07]);
    port.queue_variable_response(ADDRESS, &ud).unwrap();

    let mut master = master_with(&port);
    assert!(master.request_and_cache_all(ADDRESS).await.unwrap().0);
    assert!(master.get_fixed_header(ADDRESS).is_none());
    assert_eq!(master.cache().records().len(), 1);
}

#[tokio::test]
async fn test_write_failure_escapes_read() {
    let port = MockSerialPort::new();
    port.fail_next_write(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"));

    let mut master = master_with(&port);
    let err = master.request_and_cache_all(ADDRESS).await.unwrap_err();
    assert!(matches!(err, MBusError::Io(_)));
}

#[tokio::test]
async fn test_log_request_not_acknowledged() {
    let port = MockSerialPort::new();
    let mut master = master_with(&port);

    let err = master.read_all_logs(ADDRESS, LogType::Alarm).await.unwrap_err();
    assert!(matches!(err, MBusError::NotAcknowledged));
}

#[tokio::test]
async fn test_read_alarm_log() {
    let port = MockSerialPort::new();
    port.queue_ack();

    let mut t1 = header([0x78, 0x56, 0x34, 0x12]);
    // Event id 2020, record number 7
    t1.extend_from_slice(&[0x02, 0xFF, 0xF9, 0x80, 0x80, 0x80, 0x07, 0xE4, 0x07]);
    t1.extend_from_slice(&[0x0E, 0xED, 0x00, 0x00, 0x30, 0x12, 0x15, 0x06, 0x24]);
    t1.extend_from_slice(&[0x04, 0xA0, 0x00, 0x5A, 0x00, 0x00, 0x00]);
    t1.push(0x1F);
    port.queue_variable_response(ADDRESS, &t1).unwrap();

    let mut t2 = header([0x78, 0x56, 0x34, 0x12]);
    // Event id 2021, no record number, no timestamp
    t2.extend_from_slice(&[0x02, 0xFF, 0xF9, 0x00, 0xE5, 0x07]);
    t2.extend_from_slice(&[0x0E, 0xED, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    t2.extend_from_slice(&[0x04, 0xA0, 0x00, 0x0A, 0x00, 0x00, 0x00]);
    port.queue_variable_response(ADDRESS, &t2).unwrap();

    let mut master = master_with(&port);
    let (events, checksum) = master.read_all_logs(ADDRESS, LogType::Alarm).await.unwrap();
    assert!(checksum > 0);
    assert_eq!(events.len(), 2);

    assert_eq!(events[0].event_id, 2020);
    assert_eq!(events[0].record_number, 7);
    assert_eq!(events[0].class, EventClass::Alarm);
    assert_eq!(events[0].timestamp, "240615123000");
    assert_eq!(events[0].duration_seconds, 90);

    assert_eq!(events[1].event_id, 2021);
    assert_eq!(events[1].record_number, 0);
    assert_eq!(events[1].timestamp, "Not available");
    assert_eq!(events[1].duration_seconds, 10);

    let tx = port.get_tx_data();
    let request = pack_long_frame(
        0x53,
        ADDRESS,
        0x51,
        &[0xC0, 0xC0, 0x80, 0x80, 0x00, 0xFF, 0xF9, 0x30],
    )
    .unwrap();
    assert!(tx.starts_with(&request));
    // Requests after the acknowledged SND_UD start from FCB 1
    assert_eq!(&tx[request.len()..request.len() + 5], &[0x10, 0x7B, ADDRESS, 0x80, 0x16]);
    assert_eq!(&tx[request.len() + 5..], &[0x10, 0x5B, ADDRESS, 0x60, 0x16]);

    // Log reads do not fill the cache
    assert!(!master.cache().is_valid());
}

#[tokio::test]
async fn test_close_invalidates() {
    let port = MockSerialPort::new();
    let mut ud = header([0x78, 0x56, 0x34, 0x12]);
    ud.extend_from_slice(&[0x01, 0x93, 0x00, 0x07]);
    port.queue_variable_response(ADDRESS, &ud).unwrap();

    let mut master = master_with(&port);
    assert!(master.request_and_cache_all(ADDRESS).await.unwrap().0);
    assert!(master.read_value(ADDRESS, 0x01, 0x93, &[], &[]).is_found());
    master.close();
    assert!(!master.is_open());
    assert!(!master.read_value(ADDRESS, 0x01, 0x93, &[], &[]).is_found());
}

#[tokio::test]
async fn test_attach_invalidates() {
    let port = MockSerialPort::new();
    let mut ud = header([0x78, 0x56, 0x34, 0x12]);
    ud.extend_from_slice(&[0x01, 0x93, 0x00, 0x07]);
    port.queue_variable_response(ADDRESS, &ud).unwrap();

    let mut master = master_with(&port);
    assert!(master.request_and_cache_all(ADDRESS).await.unwrap().0);
    assert!(master.read_value(ADDRESS, 0x01, 0x93, &[], &[]).is_found());
    assert!(master.get_fixed_header(ADDRESS).is_some());

    master.attach(MockSerialPort::new());
    assert!(master.is_open());
    assert!(!master.read_value(ADDRESS, 0x01, 0x93, &[], &[]).is_found());
    assert!(master.get_fixed_header(ADDRESS).is_none());
}

#[tokio::test]
async fn test_read_stops_at_telegram_limit() {
    let port = MockSerialPort::new();
    for _ in 0..MBUS_MAX_TELEGRAMS_PER_SESSION + 5 {
        let mut ud = header([0x78, 0x56, 0x34, 0x12]);
        ud.extend_from_slice(&[0x01, 0x13, 0x07, 0x1F]);
        port.queue_variable_response(ADDRESS, &ud).unwrap();
    }

    let mut master = master_with(&port);
    let (ok, _) = master.request_and_cache_all(ADDRESS).await.unwrap();
    assert!(ok);

    let requests = short_frames(&port.get_tx_data());
    assert_eq!(requests.len(), MBUS_MAX_TELEGRAMS_PER_SESSION);
    assert!(requests.iter().all(|f| f[1] == 0x5B || f[1] == 0x7B));
    assert_eq!(master.cache().records().len(), MBUS_MAX_TELEGRAMS_PER_SESSION);
    assert!(port.pending_rx() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_delay_between_requests_only() {
    let config = SerialConfig {
        inter_telegram_delay_ms: 200,
        ..test_config()
    };

    // A single telegram is requested without waiting
    let port = MockSerialPort::new();
    let mut ud = header([0x78, 0x56, 0x34, 0x12]);
    ud.extend_from_slice(&[0x01, 0x13, 0x07]);
    port.queue_variable_response(ADDRESS, &ud).unwrap();
    let mut master = MBusMaster::with_port(port.clone(), config.clone());
    let start = tokio::time::Instant::now();
    assert!(master.request_and_cache_all(ADDRESS).await.unwrap().0);
    assert_eq!(start.elapsed(), Duration::ZERO);

    let port = MockSerialPort::new();
    for more in [true, true, false] {
        let mut ud = header([0x78, 0x56, 0x34, 0x12]);
        ud.extend_from_slice(&[0x01, 0x13, 0x07]);
        if more {
            ud.push(0x1F);
        }
        port.queue_variable_response(ADDRESS, &ud).unwrap();
    }
    let mut master = MBusMaster::with_port(port.clone(), config);
    let start = tokio::time::Instant::now();
    assert!(master.request_and_cache_all(ADDRESS).await.unwrap().0);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(400), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
    assert_eq!(short_frames(&port.get_tx_data()).len(), 3);
    assert_eq!(master.cache().records().len(), 3);
}
