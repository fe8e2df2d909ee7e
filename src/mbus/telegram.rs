//! Decoded M-Bus telegrams.
//!
//! A [`Telegram`] is a validated frame plus, for variable data responses, the
//! parsed fixed header and data records of its user data.

use crate::constants::MBUS_CONTROL_INFO_RESP_VARIABLE;
use crate::error::Result;
use crate::mbus::frame::{is_rsp_ud, parse_frame, MBusFrame, MBusFrameType};
use crate::payload::record::{parse_variable_data, DataRecord, FixedHeader};

#[derive(Debug, Clone, PartialEq)]
pub struct Telegram {
    pub frame_type: MBusFrameType,
    pub control: u8,
    pub address: u8,
    pub control_information: u8,
    pub user_data: Vec<u8>,
    /// Last user data byte was 0x1F.
    pub more_records_follow: bool,
    pub fixed_header: Option<FixedHeader>,
    pub records: Vec<DataRecord>,
}

impl Telegram {
    /// Decodes a raw frame and, for a variable data response, its records.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        parse_frame(bytes).map(Telegram::from)
    }

    pub fn is_ack(&self) -> bool {
        self.frame_type == MBusFrameType::Ack
    }

    /// RSP_UD long frame from a slave carrying variable data.
    pub fn is_variable_data_response(&self) -> bool {
        self.frame_type == MBusFrameType::Long
            && is_variable_response(self.control, self.control_information)
    }
}

fn is_variable_response(control: u8, control_information: u8) -> bool {
    is_rsp_ud(control) && control_information == MBUS_CONTROL_INFO_RESP_VARIABLE
}

impl From<MBusFrame> for Telegram {
    fn from(frame: MBusFrame) -> Self {
        let mut telegram = Telegram {
            frame_type: frame.frame_type,
            control: frame.control,
            address: frame.address,
            control_information: frame.control_information,
            user_data: frame.data,
            more_records_follow: false,
            fixed_header: None,
            records: Vec::new(),
        };

        if telegram.is_variable_data_response() && !telegram.user_data.is_empty() {
            let block = parse_variable_data(&telegram.user_data, telegram.address);
            telegram.more_records_follow = block.more_records_follow;
            telegram.fixed_header = block.fixed_header;
            telegram.records = block.records;
        }

        telegram
    }
}
