//! # M-Bus Error Handling
//!
//! This module defines the MBusError enum, which represents the different error
//! types that can occur while talking to a meter.
//!
//! Structure, checksum and format errors are local to one decode attempt. The
//! session controller turns them into "no usable response" or "not found"
//! outcomes; only the precondition variants reach the caller as errors.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MBusError>;

/// Represents the different error types that can occur in the M-Bus crate.
#[derive(Debug, Error)]
pub enum MBusError {
    /// Frame too short, bad stop byte, mismatched length fields, unknown start byte.
    #[error("Invalid frame structure: {0}")]
    Structure(String),

    /// Indicates a checksum mismatch.
    #[error("Invalid checksum: expected 0x{expected:02X}, calculated 0x{calculated:02X}")]
    Checksum { expected: u8, calculated: u8 },

    /// No response arrived within the read timeout.
    #[error("Timed out waiting for response")]
    Timeout,

    /// An exchange was attempted on a link that is not open.
    #[error("Serial link is not open")]
    LinkNotOpen,

    /// SND_UD payload exceeds what a long frame can carry.
    #[error("User data payload too large: {0} bytes (maximum 252)")]
    PayloadTooLarge(usize),

    /// Invalid BCD digit or numeric conversion failure in a single value.
    #[error("Format error: {0}")]
    Format(String),

    /// The meter did not acknowledge a command.
    #[error("Command not acknowledged by the meter")]
    NotAcknowledged,

    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MBusError {
    /// True for the conditions that are reported to the caller instead of
    /// being folded into a failed exchange.
    pub fn is_precondition(&self) -> bool {
        matches!(self, MBusError::LinkNotOpen | MBusError::PayloadTooLarge(_))
    }
}

impl From<tokio_serial::Error> for MBusError {
    fn from(err: tokio_serial::Error) -> Self {
        MBusError::SerialPortError(err.to_string())
    }
}

impl From<serde_json::Error> for MBusError {
    fn from(err: serde_json::Error) -> Self {
        MBusError::Config(err.to_string())
    }
}
