//! # M-Bus Serial Communication
//!
//! This module provides the serial link used by the master: link settings
//! loaded from JSON, opening a tokio-serial port with M-Bus framing, and
//! reading one raw frame at a time with a timeout.
//!
//! The link is strictly half-duplex. Reading stops at the end of one frame so
//! that bytes of a following frame stay in the port buffer.

use crate::constants::*;
use crate::error::{MBusError, Result};
use crate::logging::log_frame_hex;
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;

/// Parity setting of the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    None,
    Odd,
    Even,
}

impl From<ParitySetting> for tokio_serial::Parity {
    fn from(parity: ParitySetting) -> Self {
        match parity {
            ParitySetting::None => tokio_serial::Parity::None,
            ParitySetting::Odd => tokio_serial::Parity::Odd,
            ParitySetting::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Configuration for serial connection.
///
/// Every field has a default, so a JSON file only needs the values that
/// differ (usually just `port`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    pub parity: ParitySetting,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub read_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub write_ack_timeout_ms: u64,
    pub inter_telegram_delay_ms: u64,
    pub init_attempts: u32,
    pub init_retry_delay_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: String::new(),
            baudrate: 2400,
            parity: ParitySetting::Even,
            data_bits: 8,
            stop_bits: 1,
            read_timeout_ms: 5000,
            ack_timeout_ms: 250,
            write_ack_timeout_ms: 10_000,
            inter_telegram_delay_ms: 200,
            init_attempts: 3,
            init_retry_delay_ms: 300,
        }
    }
}

impl SerialConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SerialConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MBusError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Checks the framing values that tokio-serial cannot represent.
    pub fn validate(&self) -> Result<()> {
        self.tokio_data_bits()?;
        self.tokio_stop_bits()?;
        if self.baudrate == 0 {
            return Err(MBusError::Config("baudrate must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn write_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.write_ack_timeout_ms)
    }

    pub fn inter_telegram_delay(&self) -> Duration {
        Duration::from_millis(self.inter_telegram_delay_ms)
    }

    pub fn init_retry_delay(&self) -> Duration {
        Duration::from_millis(self.init_retry_delay_ms)
    }

    fn tokio_data_bits(&self) -> Result<tokio_serial::DataBits> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            n => Err(MBusError::Config(format!("unsupported data bits: {n}"))),
        }
    }

    fn tokio_stop_bits(&self) -> Result<tokio_serial::StopBits> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            n => Err(MBusError::Config(format!("unsupported stop bits: {n}"))),
        }
    }
}

/// A byte stream that can carry M-Bus frames.
pub trait SerialPort: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPort for T {}

/// Opens a serial port with the framing from `config`.
pub fn open_serial(config: &SerialConfig) -> Result<tokio_serial::SerialStream> {
    let port = tokio_serial::new(config.port.as_str(), config.baudrate)
        .data_bits(config.tokio_data_bits()?)
        .stop_bits(config.tokio_stop_bits()?)
        .parity(config.parity.into())
        .timeout(config.read_timeout())
        .open_native_async()?;
    Ok(port)
}

/// Writes a frame and flushes the port.
pub async fn send_raw<P: SerialPort + ?Sized>(port: &mut P, frame: &[u8]) -> Result<()> {
    log_frame_hex("TX", frame);
    port.write_all(frame).await?;
    port.flush().await?;
    Ok(())
}

/// Fills `buf` within `limit`. Silence, a port-level timeout and end of
/// stream all count as `Timeout`.
async fn read_exact_within<P: SerialPort + ?Sized>(
    port: &mut P,
    buf: &mut [u8],
    limit: Duration,
) -> Result<()> {
    match timeout(limit, port.read_exact(buf)).await {
        Err(_) => Err(MBusError::Timeout),
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof || e.kind() == ErrorKind::TimedOut => {
            Err(MBusError::Timeout)
        }
        Ok(Err(e)) => Err(e.into()),
    }
}

async fn read_frame<P: SerialPort + ?Sized>(port: &mut P, limit: Duration) -> Result<Vec<u8>> {
    let mut start = [0u8; 1];
    read_exact_within(port, &mut start, limit).await?;

    let mut frame = vec![start[0]];
    match start[0] {
        MBUS_FRAME_ACK_START => {}
        MBUS_FRAME_SHORT_START => {
            let mut rest = [0u8; MBUS_FRAME_SHORT_LENGTH - 1];
            read_exact_within(port, &mut rest, limit).await?;
            frame.extend_from_slice(&rest);
        }
        MBUS_FRAME_LONG_START => {
            let mut header = [0u8; 3];
            read_exact_within(port, &mut header, limit).await?;
            if header[2] != MBUS_FRAME_LONG_START {
                return Err(MBusError::Structure(format!(
                    "bad second start byte 0x{:02X}",
                    header[2]
                )));
            }
            if header[0] < MBUS_FRAME_LONG_MIN_L_FIELD {
                return Err(MBusError::Structure(format!(
                    "length field {} below minimum",
                    header[0]
                )));
            }
            frame.extend_from_slice(&header);

            // C A CI data CS 16
            let mut body = vec![0u8; header[0] as usize + 2];
            read_exact_within(port, &mut body, limit).await?;
            frame.extend_from_slice(&body);
        }
        other => {
            return Err(MBusError::Structure(format!(
                "unknown start byte 0x{other:02X}"
            )))
        }
    }
    Ok(frame)
}

/// Reads one raw frame from the link.
///
/// Returns `Ok(None)` when nothing (or only part of a frame) arrives within
/// `limit`. An unknown start byte is a `Structure` error.
pub async fn recv_raw_frame<P: SerialPort + ?Sized>(
    port: &mut P,
    limit: Duration,
) -> Result<Option<Vec<u8>>> {
    match read_frame(port, limit).await {
        Ok(frame) => {
            log_frame_hex("RX", &frame);
            Ok(Some(frame))
        }
        Err(MBusError::Timeout) => {
            debug!("No complete frame within {} ms", limit.as_millis());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
