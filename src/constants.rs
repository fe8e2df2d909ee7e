//! M-Bus Protocol Constants
//!
//! This module defines constants used by the master-side M-Bus implementation,
//! based on the EN 13757-2/3 standard.

// ----------------------------------------------------------------------------
// Frame layout
// ----------------------------------------------------------------------------

/// Single character acknowledgement frame
pub const MBUS_FRAME_ACK_START: u8 = 0xE5;

/// Short frame start byte
pub const MBUS_FRAME_SHORT_START: u8 = 0x10;

/// Long frame start byte (appears twice in the header)
pub const MBUS_FRAME_LONG_START: u8 = 0x68;

/// Stop byte terminating short and long frames
pub const MBUS_FRAME_STOP: u8 = 0x16;

/// Total length of a short frame
pub const MBUS_FRAME_SHORT_LENGTH: usize = 5;

/// Minimum total length of a long frame (L = 3, no user data)
pub const MBUS_FRAME_LONG_MIN_LENGTH: usize = 9;

/// Bytes of a long frame outside the L-field span: 0x68 L L 0x68 .. CS 0x16
pub const MBUS_FRAME_LONG_OVERHEAD: usize = 6;

/// Minimum L-field value (control, address, CI)
pub const MBUS_FRAME_LONG_MIN_L_FIELD: u8 = 3;

/// Largest user-data payload a long frame can carry
pub const MBUS_FRAME_MAX_USER_DATA: usize = 252;

// ----------------------------------------------------------------------------
// Control field
// ----------------------------------------------------------------------------

pub const MBUS_CONTROL_MASK_SND_NKE: u8 = 0x40;
pub const MBUS_CONTROL_MASK_SND_UD: u8 = 0x53; // includes DIR M2S
pub const MBUS_CONTROL_MASK_REQ_UD2: u8 = 0x5B; // includes DIR M2S
pub const MBUS_CONTROL_MASK_RSP_UD: u8 = 0x08; // S2M response

// Control flag bits
pub const MBUS_CONTROL_MASK_FCB: u8 = 0x20;
pub const MBUS_CONTROL_MASK_DIR_M2S: u8 = 0x40;

/// Low nibble of the control field carries the function code
pub const MBUS_CONTROL_MASK_FUNCTION: u8 = 0x0F;

// ----------------------------------------------------------------------------
// Control information (CI) codes
// ----------------------------------------------------------------------------

pub const MBUS_CONTROL_INFO_DATA_SEND: u8 = 0x51;
pub const MBUS_CONTROL_INFO_RESP_VARIABLE: u8 = 0x72;

// ----------------------------------------------------------------------------
// Variable data structure
// ----------------------------------------------------------------------------

/// Fixed data header length in a variable data response
pub const MBUS_DATA_VARIABLE_HEADER_LENGTH: usize = 12;

/// DIF (Data Information Field) mask for data length / coding
pub const MBUS_DATA_RECORD_DIF_MASK_DATA: u8 = 0x0F;

/// DIF idle filler
pub const MBUS_DIB_DIF_IDLE_FILLER: u8 = 0x2F;

/// DIF manufacturer specific
pub const MBUS_DIB_DIF_MANUFACTURER_SPECIFIC: u8 = 0x0F;

/// DIF more records follow
pub const MBUS_DIB_DIF_MORE_RECORDS_FOLLOW: u8 = 0x1F;

/// DIF extension bit
pub const MBUS_DIB_DIF_EXTENSION_BIT: u8 = 0x80;

/// VIF extension bit
pub const MBUS_DIB_VIF_EXTENSION_BIT: u8 = 0x80;

/// VIF selecting the first extension table (EN 13757-3 table 14)
pub const MBUS_DIB_VIF_EXTENSION_FD: u8 = 0xFD;

/// VIF selecting manufacturer specific VIFEs
pub const MBUS_DIB_VIF_MANUFACTURER_FF: u8 = 0xFF;

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Hard cap on telegrams requested in one multi-telegram read
pub const MBUS_MAX_TELEGRAMS_PER_SESSION: usize = 100;

/// Log read command sent with SND_UD; the last byte selects the log type.
pub const MBUS_LOG_REQUEST_PREFIX: [u8; 7] = [0xC0, 0xC0, 0x80, 0x80, 0x00, 0xFF, 0xF9];

/// Byte offset subtracted from every raw response in the diagnostic checksum
pub const MBUS_DIAGNOSTIC_SKIP_OFFSET: usize = 15;
