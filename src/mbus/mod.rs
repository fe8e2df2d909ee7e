//! The mbus module contains the components responsible for the core M-Bus protocol
//! implementation: frame codec, telegram decoding, the serial link and the
//! master session controller.

pub mod blocking;
pub mod frame;
pub mod mbus_protocol;
pub mod serial;
pub mod serial_mock;
pub mod telegram;

pub use blocking::BlockingMaster;
pub use frame::*;
pub use mbus_protocol::*;
pub use serial::*;
pub use telegram::Telegram;
