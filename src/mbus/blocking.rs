//! Blocking wrapper around [`MBusMaster`].
//!
//! Owns a current-thread tokio runtime and drives each async operation to
//! completion. For callers without an async context.

use crate::error::Result;
use crate::mbus::mbus_protocol::{ExchangeState, FrameControlBit, MBusMaster};
use crate::mbus::serial::{SerialConfig, SerialPort};
use crate::payload::header::ReadableFixedHeader;
use crate::payload::log_event::{LogEvent, LogType};
use crate::payload::value::MBusReadResult;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

pub struct BlockingMaster<P = tokio_serial::SerialStream> {
    runtime: Runtime,
    inner: MBusMaster<P>,
}

fn current_thread_runtime() -> Result<Runtime> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

impl BlockingMaster<tokio_serial::SerialStream> {
    /// Opens the configured serial port.
    pub fn open(config: SerialConfig) -> Result<Self> {
        let runtime = current_thread_runtime()?;
        let mut inner: MBusMaster = MBusMaster::new(config);
        {
            // The serial stream registers with the runtime's reactor
            let _guard = runtime.enter();
            inner.open()?;
        }
        Ok(BlockingMaster { runtime, inner })
    }

    pub fn open_port(&mut self, port: &str, baudrate: u32, read_timeout: Duration) -> Result<()> {
        let _guard = self.runtime.enter();
        self.inner.open_port(port, baudrate, read_timeout)
    }
}

impl<P: SerialPort> BlockingMaster<P> {
    pub fn with_port(port: P, config: SerialConfig) -> Result<Self> {
        Ok(BlockingMaster {
            runtime: current_thread_runtime()?,
            inner: MBusMaster::with_port(port, config),
        })
    }

    pub fn close(&mut self) {
        self.inner.close();
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    pub fn frame_control_bit(&self) -> FrameControlBit {
        self.inner.frame_control_bit()
    }

    pub fn last_exchange_state(&self) -> ExchangeState {
        self.inner.last_exchange_state()
    }

    pub fn initialize_device(
        &mut self,
        address: u8,
        max_attempts: u32,
        ack_timeout: Duration,
        retry_delay: Duration,
    ) -> Result<bool> {
        self.runtime.block_on(
            self.inner
                .initialize_device(address, max_attempts, ack_timeout, retry_delay),
        )
    }

    pub fn request_and_cache_all(&mut self, address: u8) -> Result<(bool, i64)> {
        self.runtime.block_on(self.inner.request_and_cache_all(address))
    }

    pub fn send_user_data(
        &mut self,
        address: u8,
        control_information: u8,
        payload: &[u8],
    ) -> Result<bool> {
        self.runtime
            .block_on(self.inner.send_user_data(address, control_information, payload))
    }

    pub fn read_value(
        &self,
        address: u8,
        dif: u8,
        vif: u8,
        difes: &[u8],
        vifes: &[u8],
    ) -> MBusReadResult {
        self.inner.read_value(address, dif, vif, difes, vifes)
    }

    pub fn get_fixed_header(&self, address: u8) -> Option<ReadableFixedHeader> {
        self.inner.get_fixed_header(address)
    }

    pub fn read_all_logs(&mut self, address: u8, log_type: LogType) -> Result<(Vec<LogEvent>, i64)> {
        self.runtime.block_on(self.inner.read_all_logs(address, log_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbus::serial_mock::MockSerialPort;

    #[test]
    fn test_blocking_reset_and_read() {
        let port = MockSerialPort::new();
        port.queue_ack();
        let mut ud = vec![
            0x78, 0x56, 0x34, 0x12, 0x42, 0x04, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00,
        ];
        // Voltage, phase VIFE 0x05
        ud.extend_from_slice(&[0x02, 0xFD, 0xC8, 0x05, 0xE6, 0x08]);
        port.queue_variable_response(0x05, &ud).unwrap();

        let config = SerialConfig {
            inter_telegram_delay_ms: 0,
            ..SerialConfig::default()
        };
        let mut master = BlockingMaster::with_port(port, config).unwrap();
        assert!(master
            .initialize_device(0x05, 3, Duration::from_millis(10), Duration::ZERO)
            .unwrap());
        assert!(master.request_and_cache_all(0x05).unwrap().0);
        assert_eq!(master.get_fixed_header(0x05).unwrap().serial_number, "12345678");
        let voltage = master.read_value(0x05, 0x02, 0xFD, &[], &[0xC8]);
        assert_eq!(voltage.unit(), Some("V"));
        assert_eq!(voltage.last_vife(), Some(0x05));

        master.close();
        assert!(!master.is_open());
        assert!(master.get_fixed_header(0x05).is_none());
    }
}
