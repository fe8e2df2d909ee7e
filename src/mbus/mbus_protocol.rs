//! # M-Bus Protocol Implementation
//!
//! This module provides the master side of the M-Bus link: device reset,
//! REQ_UD2 / RSP_UD exchanges with frame control bit (FCB) handling,
//! multi-telegram reads driven by the "more records follow" marker, SND_UD
//! writes, log reads and a per-address cache of the last full read.
//!
//! Exactly one exchange is in flight at a time. Every operation takes
//! `&mut self`, so a master instance owns its link and cannot be driven from
//! two places at once.
//!
//! Decode failures, timeouts and unexpected responses never escape as errors:
//! they end the current exchange and show up as `false`, `None` or
//! [`MBusReadResult::NotFound`]. Only a closed link, an oversized payload, an
//! unacknowledged log request and write failures are returned as `Err`.

use crate::constants::*;
use crate::error::{MBusError, Result};
use crate::mbus::frame::{is_rsp_ud, pack_long_frame, pack_short_frame, MBusFrameType};
use crate::mbus::serial::{open_serial, recv_raw_frame, send_raw, SerialConfig, SerialPort};
use crate::mbus::telegram::Telegram;
use crate::payload::header::ReadableFixedHeader;
use crate::payload::log_event::{parse_log_records, LogEvent, LogType};
use crate::payload::record::{DataRecord, FixedHeader};
use crate::payload::value::{interpret_record, MBusReadResult};
use log::{debug, info, warn};
use std::ops::ControlFlow;
use std::time::Duration;

/// Frame control bit of the next SND_UD / REQ_UD2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameControlBit {
    #[default]
    Zero,
    One,
}

impl FrameControlBit {
    pub fn toggle(self) -> Self {
        match self {
            FrameControlBit::Zero => FrameControlBit::One,
            FrameControlBit::One => FrameControlBit::Zero,
        }
    }

    fn apply(self, control: u8) -> u8 {
        match self {
            FrameControlBit::Zero => control,
            FrameControlBit::One => control | MBUS_CONTROL_MASK_FCB,
        }
    }

    /// REQ_UD2 control field: 0x5B or 0x7B.
    pub fn req_ud2_control(self) -> u8 {
        self.apply(MBUS_CONTROL_MASK_REQ_UD2)
    }

    /// SND_UD control field: 0x53 or 0x73.
    pub fn snd_ud_control(self) -> u8 {
        self.apply(MBUS_CONTROL_MASK_SND_UD)
    }
}

/// Where the most recent exchange ended up.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    Sent,
    AwaitingResponse,
    Decoded,
    TimedOut,
    Malformed,
}

/// Result of the last successful full read.
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    address: Option<u8>,
    fixed_header: Option<FixedHeader>,
    records: Vec<DataRecord>,
}

impl SessionCache {
    pub fn invalidate(&mut self) {
        self.address = None;
        self.fixed_header = None;
        self.records.clear();
    }

    fn store(&mut self, address: u8, fixed_header: Option<FixedHeader>, records: Vec<DataRecord>) {
        self.address = Some(address);
        self.fixed_header = fixed_header;
        self.records = records;
    }

    pub fn is_valid(&self) -> bool {
        self.address.is_some()
    }

    pub fn is_valid_for(&self, address: u8) -> bool {
        self.address == Some(address)
    }

    pub fn fixed_header(&self) -> Option<&FixedHeader> {
        self.fixed_header.as_ref()
    }

    pub fn records(&self) -> &[DataRecord] {
        &self.records
    }
}

/// Diagnostic sum of one raw response.
///
/// Sum of all bytes minus the frame checksum byte and the byte at offset 15
/// (taken as 0 for frames shorter than 16 bytes).
pub fn response_checksum(raw: &[u8]) -> i64 {
    if raw.len() < 2 {
        return 0;
    }
    let total: i64 = raw.iter().map(|&b| i64::from(b)).sum();
    let skipped = raw
        .get(MBUS_DIAGNOSTIC_SKIP_OFFSET)
        .map_or(0, |&b| i64::from(b));
    total - i64::from(raw[raw.len() - 2]) - skipped
}

/// Finds the first record matching a selector.
///
/// DIF, VIF and DIFEs must match exactly. The record's VIFEs must be the
/// given prefix followed by exactly one more byte.
pub fn find_record<'a>(
    records: &'a [DataRecord],
    dif: u8,
    vif: u8,
    difes: &[u8],
    vife_prefix: &[u8],
) -> Option<&'a DataRecord> {
    records.iter().find(|r| {
        r.dif == dif
            && r.vif == vif
            && r.difes == difes
            && r.vifes.len() == vife_prefix.len() + 1
            && r.vifes.starts_with(vife_prefix)
    })
}

/// Outcome of one REQ_UD2 exchange.
enum Exchange {
    Response { telegram: Telegram, raw: Vec<u8> },
    NoResponse,
    Malformed,
}

/// FCB after an exchange: toggled by every RSP_UD long frame.
/// Whole milliseconds of `d`, saturating at `u64::MAX`.
fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn next_fcb(fcb: FrameControlBit, exchange: &Exchange) -> FrameControlBit {
    match exchange {
        Exchange::Response { telegram, .. }
            if telegram.frame_type == MBusFrameType::Long && is_rsp_ud(telegram.control) =>
        {
            fcb.toggle()
        }
        _ => fcb,
    }
}

/// M-Bus master bound to one serial link.
pub struct MBusMaster<P = tokio_serial::SerialStream> {
    port: Option<P>,
    config: SerialConfig,
    fcb: FrameControlBit,
    cache: SessionCache,
    state: ExchangeState,
}

impl MBusMaster<tokio_serial::SerialStream> {
    /// Opens the serial port named in the configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&mut self) -> Result<()> {
        let port = open_serial(&self.config)?;
        info!(
            "Opened {} at {} baud ({:?} parity)",
            self.config.port, self.config.baudrate, self.config.parity
        );
        self.attach(port);
        Ok(())
    }

    /// Opens `port` with the given baud rate and read timeout, keeping the
    /// remaining link settings.
    pub fn open_port(&mut self, port: &str, baudrate: u32, read_timeout: Duration) -> Result<()> {
        self.close();
        self.config.port = port.to_string();
        self.config.baudrate = baudrate;
        self.config.read_timeout_ms = duration_millis(read_timeout);
        self.open()
    }
}

impl<P: SerialPort> MBusMaster<P> {
    /// Creates a master with no link attached.
    pub fn new(config: SerialConfig) -> Self {
        MBusMaster {
            port: None,
            config,
            fcb: FrameControlBit::Zero,
            cache: SessionCache::default(),
            state: ExchangeState::Idle,
        }
    }

    pub fn with_port(port: P, config: SerialConfig) -> Self {
        let mut master = Self::new(config);
        master.attach(port);
        master
    }

    /// Installs a link, replacing any previous one.
    pub fn attach(&mut self, port: P) {
        self.port = Some(port);
        self.cache.invalidate();
        self.state = ExchangeState::Idle;
    }

    /// Drops the link.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed serial link {}", self.config.port);
        }
        self.cache.invalidate();
        self.state = ExchangeState::Idle;
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    pub fn frame_control_bit(&self) -> FrameControlBit {
        self.fcb
    }

    pub fn last_exchange_state(&self) -> ExchangeState {
        self.state
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Resets a device with SND_NKE until it acknowledges.
    ///
    /// Sends at most `max_attempts` frames (at least one). The FCB is 1 after
    /// the first send whatever the outcome. A closed link fails at once with
    /// `LinkNotOpen`; everything else is reported as `Ok(false)`.
    pub async fn initialize_device(
        &mut self,
        address: u8,
        max_attempts: u32,
        ack_timeout: Duration,
        retry_delay: Duration,
    ) -> Result<bool> {
        self.cache.invalidate();
        let port = self.port.as_mut().ok_or(MBusError::LinkNotOpen)?;
        let request = pack_short_frame(MBUS_CONTROL_MASK_SND_NKE, address);
        let attempts = max_attempts.max(1);

        for attempt in 1..=attempts {
            debug!("SND_NKE to {address}, attempt {attempt}/{attempts}");
            self.state = ExchangeState::Sent;
            let sent = send_raw(port, &request).await;
            self.fcb = FrameControlBit::One;

            match sent {
                Err(e) => warn!("SND_NKE to {address} not sent: {e}"),
                Ok(()) => {
                    self.state = ExchangeState::AwaitingResponse;
                    match recv_raw_frame(port, ack_timeout).await {
                        Ok(Some(raw)) if raw == [MBUS_FRAME_ACK_START] => {
                            self.state = ExchangeState::Decoded;
                            info!("Device {address} acknowledged reset");
                            return Ok(true);
                        }
                        Ok(Some(raw)) => {
                            self.state = ExchangeState::Malformed;
                            warn!("Unexpected reply to SND_NKE: {}", hex::encode_upper(raw));
                        }
                        Ok(None) => {
                            self.state = ExchangeState::TimedOut;
                            warn!("No ACK from {address} (attempt {attempt}/{attempts})");
                        }
                        Err(e) => {
                            self.state = ExchangeState::Malformed;
                            warn!("Bad reply to SND_NKE: {e}");
                        }
                    }
                }
            }

            if attempt < attempts {
                tokio::time::sleep(retry_delay).await;
            }
        }

        Ok(false)
    }

    /// [`initialize_device`](Self::initialize_device) with the configured
    /// attempt count and timings.
    pub async fn initialize(&mut self, address: u8) -> Result<bool> {
        let attempts = self.config.init_attempts;
        let ack_timeout = self.config.ack_timeout();
        let retry_delay = self.config.init_retry_delay();
        self.initialize_device(address, attempts, ack_timeout, retry_delay)
            .await
    }

    /// Sends one REQ_UD2 with `fcb` and returns the outcome with the FCB to
    /// use next.
    async fn request_telegram(
        &mut self,
        address: u8,
        fcb: FrameControlBit,
    ) -> Result<(Exchange, FrameControlBit)> {
        let limit = self.config.read_timeout();
        let port = self.port.as_mut().ok_or(MBusError::LinkNotOpen)?;

        self.state = ExchangeState::Sent;
        send_raw(port, &pack_short_frame(fcb.req_ud2_control(), address)).await?;
        self.state = ExchangeState::AwaitingResponse;

        let exchange = match recv_raw_frame(port, limit).await {
            Ok(Some(raw)) => match Telegram::decode(&raw) {
                Ok(telegram) => Exchange::Response { telegram, raw },
                Err(e) => {
                    warn!("Discarding response from {address}: {e}");
                    Exchange::Malformed
                }
            },
            Ok(None) => Exchange::NoResponse,
            Err(e) => {
                warn!("Discarding response from {address}: {e}");
                Exchange::Malformed
            }
        };

        self.state = match exchange {
            Exchange::Response { .. } => ExchangeState::Decoded,
            Exchange::NoResponse => ExchangeState::TimedOut,
            Exchange::Malformed => ExchangeState::Malformed,
        };
        let next = next_fcb(fcb, &exchange);
        Ok((exchange, next))
    }

    /// Requests telegrams until the meter signals the end, stops answering,
    /// or `on_telegram` breaks. Returns the diagnostic checksum.
    async fn collect_telegrams<F>(&mut self, address: u8, mut on_telegram: F) -> Result<i64>
    where
        F: FnMut(Telegram) -> ControlFlow<()>,
    {
        let delay = self.config.inter_telegram_delay();
        let mut checksum = 0i64;

        for count in 0..MBUS_MAX_TELEGRAMS_PER_SESSION {
            if count > 0 {
                tokio::time::sleep(delay).await;
            }

            let (exchange, next) = self.request_telegram(address, self.fcb).await?;
            self.fcb = next;

            let (telegram, raw) = match exchange {
                Exchange::Response { telegram, raw } => (telegram, raw),
                Exchange::NoResponse => {
                    debug!("No response from {address} after {count} telegrams");
                    break;
                }
                Exchange::Malformed => break,
            };

            if raw.len() > 2 {
                checksum += response_checksum(&raw);
            }
            if !telegram.is_variable_data_response() {
                debug!(
                    "Ending read: C=0x{:02X} CI=0x{:02X} is not a variable data response",
                    telegram.control, telegram.control_information
                );
                break;
            }

            let more = telegram.more_records_follow;
            if on_telegram(telegram).is_break() || !more {
                break;
            }
            if count + 1 == MBUS_MAX_TELEGRAMS_PER_SESSION {
                warn!("Telegram limit reached for {address}, more data was announced");
            }
        }

        Ok(checksum)
    }

    /// Reads every telegram of a device into the cache.
    ///
    /// Returns whether anything usable (a header or at least one record)
    /// arrived, with the diagnostic checksum of the read (0 on failure).
    pub async fn request_and_cache_all(&mut self, address: u8) -> Result<(bool, i64)> {
        self.cache.invalidate();
        self.fcb = FrameControlBit::One;

        let mut fixed_header: Option<FixedHeader> = None;
        let mut records: Vec<DataRecord> = Vec::new();
        let mut telegrams = 0usize;

        let checksum = self
            .collect_telegrams(address, |telegram| {
                telegrams += 1;
                if fixed_header.is_none() {
                    fixed_header = telegram
                        .fixed_header
                        .filter(|h| h.identification_number != 0);
                }
                records.extend(telegram.records);
                ControlFlow::Continue(())
            })
            .await?;

        if fixed_header.is_none() && records.is_empty() {
            warn!("No usable data from {address}");
            return Ok((false, 0));
        }

        info!(
            "Cached {} records from {telegrams} telegrams of device {address}",
            records.len()
        );
        self.cache.store(address, fixed_header, records);
        Ok((true, checksum))
    }

    /// Sends user data with SND_UD and waits for the ACK.
    ///
    /// The FCB is toggled only when the meter acknowledges.
    pub async fn send_user_data(
        &mut self,
        address: u8,
        control_information: u8,
        payload: &[u8],
    ) -> Result<bool> {
        if payload.len() > MBUS_FRAME_MAX_USER_DATA {
            return Err(MBusError::PayloadTooLarge(payload.len()));
        }
        let limit = self.config.write_ack_timeout();
        let port = self.port.as_mut().ok_or(MBusError::LinkNotOpen)?;
        self.cache.invalidate();

        let frame = pack_long_frame(self.fcb.snd_ud_control(), address, control_information, payload)?;
        self.state = ExchangeState::Sent;
        send_raw(port, &frame).await?;
        self.state = ExchangeState::AwaitingResponse;

        match recv_raw_frame(port, limit).await {
            Ok(Some(raw)) if raw == [MBUS_FRAME_ACK_START] => {
                self.state = ExchangeState::Decoded;
                self.fcb = self.fcb.toggle();
                Ok(true)
            }
            Ok(Some(raw)) => {
                self.state = ExchangeState::Malformed;
                warn!("SND_UD to {address} answered with {}", hex::encode_upper(raw));
                Ok(false)
            }
            Ok(None) => {
                self.state = ExchangeState::TimedOut;
                warn!("SND_UD to {address} not acknowledged");
                Ok(false)
            }
            Err(e) => {
                self.state = ExchangeState::Malformed;
                warn!("Bad reply to SND_UD: {e}");
                Ok(false)
            }
        }
    }

    /// Looks up and interprets one cached record.
    pub fn read_value(
        &self,
        address: u8,
        dif: u8,
        vif: u8,
        difes: &[u8],
        vifes: &[u8],
    ) -> MBusReadResult {
        if !self.cache.is_valid_for(address) {
            return MBusReadResult::not_found(format!(
                "Data not cached for address {address}. Read all telegrams first."
            ));
        }

        match find_record(self.cache.records(), dif, vif, difes, vifes) {
            Some(record) => interpret_record(record),
            None => MBusReadResult::not_found("Matching record not found in cached data."),
        }
    }

    /// The cached fixed header of `address` in readable form.
    pub fn get_fixed_header(&self, address: u8) -> Option<ReadableFixedHeader> {
        if !self.cache.is_valid_for(address) {
            return None;
        }
        self.cache.fixed_header().map(ReadableFixedHeader::from)
    }

    /// Requests a meter log and collects its events from every telegram.
    ///
    /// Fails with `NotAcknowledged` when the meter does not ACK the request.
    pub async fn read_all_logs(
        &mut self,
        address: u8,
        log_type: LogType,
    ) -> Result<(Vec<LogEvent>, i64)> {
        let mut request = MBUS_LOG_REQUEST_PREFIX.to_vec();
        request.push(log_type.code());

        if !self
            .send_user_data(address, MBUS_CONTROL_INFO_DATA_SEND, &request)
            .await?
        {
            return Err(MBusError::NotAcknowledged);
        }

        let mut events: Vec<LogEvent> = Vec::new();
        let checksum = self
            .collect_telegrams(address, |telegram| {
                let outcome = parse_log_records(&telegram.records, log_type);
                events.extend(outcome.events);
                if outcome.aborted {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await?;

        info!("Read {} {log_type} log events from {address}", events.len());
        Ok((events, checksum))
    }
}
