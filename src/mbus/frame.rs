//! # M-Bus Frame Codec
//!
//! This module encodes and decodes the three M-Bus link layer frame shapes
//! defined by EN 13757-2:
//!
//! ```text
//! ACK    E5
//! Short  10 C A CS 16
//! Long   68 L L 68 C A CI <user data> CS 16     (L = 3 + user data length)
//! ```
//!
//! The checksum is the 8-bit wrapping sum of every byte from C up to the end
//! of the user data. Decoding is strict: a buffer must hold exactly one frame.
//!
//! ## Usage
//!
//! ```rust
//! use mbus_master::mbus::frame::{pack_short_frame, parse_frame, MBusFrameType};
//!
//! let bytes = pack_short_frame(0x40, 0x05);
//! assert_eq!(bytes, vec![0x10, 0x40, 0x05, 0x45, 0x16]);
//!
//! let frame = parse_frame(&bytes).unwrap();
//! assert_eq!(frame.frame_type, MBusFrameType::Short);
//! assert_eq!(frame.address, 0x05);
//! ```

use crate::constants::*;
use crate::error::{MBusError, Result};
use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::take,
    number::complete::be_u8,
    sequence::tuple,
    IResult,
};

/// Represents an M-Bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBusFrame {
    pub frame_type: MBusFrameType,
    pub control: u8,
    pub address: u8,
    pub control_information: u8,
    pub data: Vec<u8>,
    pub checksum: u8,
}

/// Represents the different types of M-Bus frames.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MBusFrameType {
    Ack,
    Short,
    Long,
}

impl MBusFrame {
    pub fn ack() -> Self {
        MBusFrame {
            frame_type: MBusFrameType::Ack,
            control: 0,
            address: 0,
            control_information: 0,
            data: Vec::new(),
            checksum: 0,
        }
    }

    pub fn short(control: u8, address: u8) -> Self {
        let mut frame = MBusFrame {
            frame_type: MBusFrameType::Short,
            control,
            address,
            control_information: 0,
            data: Vec::new(),
            checksum: 0,
        };
        frame.checksum = calculate_checksum(&frame);
        frame
    }

    /// Builds a long frame; the payload must fit in 252 bytes.
    pub fn long(control: u8, address: u8, control_information: u8, data: &[u8]) -> Result<Self> {
        if data.len() > MBUS_FRAME_MAX_USER_DATA {
            return Err(MBusError::PayloadTooLarge(data.len()));
        }
        let mut frame = MBusFrame {
            frame_type: MBusFrameType::Long,
            control,
            address,
            control_information,
            data: data.to_vec(),
            checksum: 0,
        };
        frame.checksum = calculate_checksum(&frame);
        Ok(frame)
    }

    pub fn is_rsp_ud(&self) -> bool {
        is_rsp_ud(self.control)
    }
}

/// True for a slave-to-master RSP_UD control field.
pub fn is_rsp_ud(control: u8) -> bool {
    control & MBUS_CONTROL_MASK_DIR_M2S == 0
        && control & MBUS_CONTROL_MASK_FUNCTION == MBUS_CONTROL_MASK_RSP_UD
}

/// Serializes a frame into its wire form.
pub fn pack_frame(frame: &MBusFrame) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(frame.data.len() + MBUS_FRAME_LONG_MIN_LENGTH);

    match frame.frame_type {
        MBusFrameType::Ack => buf.put_u8(MBUS_FRAME_ACK_START),
        MBusFrameType::Short => {
            buf.put_u8(MBUS_FRAME_SHORT_START);
            buf.put_u8(frame.control);
            buf.put_u8(frame.address);
            buf.put_u8(frame.checksum);
            buf.put_u8(MBUS_FRAME_STOP);
        }
        MBusFrameType::Long => {
            let l_field = (frame.data.len() + 3) as u8;
            buf.put_slice(&[MBUS_FRAME_LONG_START, l_field, l_field, MBUS_FRAME_LONG_START]);
            buf.put_u8(frame.control);
            buf.put_u8(frame.address);
            buf.put_u8(frame.control_information);
            buf.put_slice(&frame.data);
            buf.put_u8(frame.checksum);
            buf.put_u8(MBUS_FRAME_STOP);
        }
    }

    buf.to_vec()
}

/// Encodes a short frame `10 C A CS 16`.
pub fn pack_short_frame(control: u8, address: u8) -> Vec<u8> {
    pack_frame(&MBusFrame::short(control, address))
}

/// Encodes a long frame; fails with `PayloadTooLarge` above 252 bytes of user data.
pub fn pack_long_frame(
    control: u8,
    address: u8,
    control_information: u8,
    data: &[u8],
) -> Result<Vec<u8>> {
    MBusFrame::long(control, address, control_information, data).map(|f| pack_frame(&f))
}

/// Verifies the integrity of an M-Bus frame.
pub fn verify_frame(frame: &MBusFrame) -> Result<()> {
    let calculated = calculate_checksum(frame);
    if frame.checksum != calculated {
        return Err(MBusError::Checksum {
            expected: frame.checksum,
            calculated,
        });
    }
    Ok(())
}

/// Calculates the checksum of an M-Bus frame.
pub fn calculate_checksum(frame: &MBusFrame) -> u8 {
    match frame.frame_type {
        MBusFrameType::Ack => 0,
        MBusFrameType::Short => frame.control.wrapping_add(frame.address),
        MBusFrameType::Long => checksum_of(&[frame.control, frame.address, frame.control_information])
            .wrapping_add(checksum_of(&frame.data)),
    }
}

/// 8-bit wrapping sum of a byte span.
pub fn checksum_of(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn long_header(input: &[u8]) -> IResult<&[u8], (u8, u8, u8, u8)> {
    tuple((be_u8, be_u8, be_u8, be_u8))(input)
}

fn long_body(input: &[u8], data_len: usize) -> IResult<&[u8], (u8, u8, u8, &[u8], u8, u8)> {
    tuple((be_u8, be_u8, be_u8, take(data_len), be_u8, be_u8))(input)
}

fn short_body(input: &[u8]) -> IResult<&[u8], (u8, u8, u8, u8)> {
    tuple((be_u8, be_u8, be_u8, be_u8))(input)
}

fn structure(msg: impl Into<String>) -> MBusError {
    MBusError::Structure(msg.into())
}

/// Decodes one complete frame.
///
/// Every structural check is done before the checksum check, so a frame
/// with both problems reports the structural one.
pub fn parse_frame(input: &[u8]) -> Result<MBusFrame> {
    let start = *input.first().ok_or_else(|| structure("empty buffer"))?;

    match start {
        MBUS_FRAME_ACK_START => {
            if input.len() != 1 {
                return Err(structure(format!(
                    "ACK frame must be exactly 1 byte, got {}",
                    input.len()
                )));
            }
            Ok(MBusFrame::ack())
        }
        MBUS_FRAME_SHORT_START => parse_short(input),
        MBUS_FRAME_LONG_START => parse_long(input),
        other => Err(structure(format!("unknown start byte 0x{other:02X}"))),
    }
}

fn parse_short(input: &[u8]) -> Result<MBusFrame> {
    if input.len() != MBUS_FRAME_SHORT_LENGTH {
        return Err(structure(format!(
            "short frame must be {MBUS_FRAME_SHORT_LENGTH} bytes, got {}",
            input.len()
        )));
    }
    let (_, (control, address, checksum, stop)) =
        short_body(&input[1..]).map_err(|_| structure("truncated short frame"))?;
    if stop != MBUS_FRAME_STOP {
        return Err(structure(format!("bad stop byte 0x{stop:02X}")));
    }

    let frame = MBusFrame {
        frame_type: MBusFrameType::Short,
        control,
        address,
        control_information: 0,
        data: Vec::new(),
        checksum,
    };
    verify_frame(&frame)?;
    Ok(frame)
}

fn parse_long(input: &[u8]) -> Result<MBusFrame> {
    if input.len() < MBUS_FRAME_LONG_MIN_LENGTH {
        return Err(structure(format!(
            "long frame needs at least {MBUS_FRAME_LONG_MIN_LENGTH} bytes, got {}",
            input.len()
        )));
    }
    let (rest, (_, l1, l2, start2)) =
        long_header(input).map_err(|_| structure("truncated long frame header"))?;
    if l1 != l2 {
        return Err(structure(format!("length fields differ: 0x{l1:02X} != 0x{l2:02X}")));
    }
    if start2 != MBUS_FRAME_LONG_START {
        return Err(structure(format!("bad second start byte 0x{start2:02X}")));
    }
    if l1 < MBUS_FRAME_LONG_MIN_L_FIELD {
        return Err(structure(format!("length field {l1} below minimum")));
    }
    let expected_len = l1 as usize + MBUS_FRAME_LONG_OVERHEAD;
    if input.len() != expected_len {
        return Err(structure(format!(
            "long frame length {} does not match L-field ({expected_len})",
            input.len()
        )));
    }

    let data_len = l1 as usize - 3;
    let (_, (control, address, control_information, data, checksum, stop)) =
        long_body(rest, data_len).map_err(|_| structure("truncated long frame body"))?;
    if stop != MBUS_FRAME_STOP {
        return Err(structure(format!("bad stop byte 0x{stop:02X}")));
    }

    let frame = MBusFrame {
        frame_type: MBusFrameType::Long,
        control,
        address,
        control_information,
        data: data.to_vec(),
        checksum,
    };
    verify_frame(&frame)?;
    Ok(frame)
}
