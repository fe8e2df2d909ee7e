//! # mbus-master - Master-side M-Bus (Meter-Bus) Communication
//!
//! The mbus-master crate implements the master side of the M-Bus protocol
//! (EN 13757-2/3) over a half-duplex serial link: it resets meters, reads
//! multi-telegram variable data responses, writes user data, and reads meter
//! event logs.
//!
//! ## Features
//!
//! - Encode and decode ACK, short and long frames with checksum validation
//! - Parse the fixed data header and variable data records of RSP_UD telegrams
//! - Interpret record values (integers, BCD, floats, ASCII) with unit and scale
//! - Multi-telegram reads with frame control bit handling and a per-address cache
//! - Log/alarm/warning event extraction
//! - Async API on tokio, plus a blocking wrapper
//!
//! ## Usage
//!
//! ```no_run
//! use mbus_master::{MBusMaster, SerialConfig};
//!
//! # async fn run() -> mbus_master::error::Result<()> {
//! let config = SerialConfig {
//!     port: "/dev/ttyUSB0".to_string(),
//!     ..SerialConfig::default()
//! };
//! let mut master: MBusMaster = MBusMaster::new(config);
//! master.open()?;
//!
//! if master.initialize(5).await? {
//!     let (ok, _checksum) = master.request_and_cache_all(5).await?;
//!     if ok {
//!         let energy = master.read_value(5, 0x04, 0x84, &[], &[]);
//!         println!("{energy}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod error;
pub mod logging;
pub mod mbus;
pub mod payload;

pub use crate::error::MBusError;
pub use crate::logging::{init_logger, log_info};

pub use mbus::{
    BlockingMaster, ExchangeState, FrameControlBit, MBusFrame, MBusFrameType, MBusMaster,
    SerialConfig, Telegram,
};
pub use payload::{
    DataRecord, EventClass, FixedHeader, LogEvent, LogType, MBusReadResult, MBusRecordValue,
    ReadableFixedHeader,
};
