//! This crate implements the serial protocol of the La Crosse WS2300 weather
//! station family.
//!
//! The station exposes its state as a 16 bit address space of nibbles. A
//! master reads up to 15 bytes, or writes nibbles and single bits, through
//! short telegrams in which every byte is acknowledged by the station. The
//! line is noisy and the station loses track of telegrams easily, so each
//! telegram is preceded by a reset handshake and retried on failure.
//!
//! The protocol logic is sans-io. [`master::ResetState`] and
//! [`master::TelegramState`] (and [`NodeState`] for the station side) are
//! state machines which consume bytes and tell the caller what to send. The
//! [`Master`] type drives them over any [`transport::Transport`], and with the
//! `serial` feature [`transport::SerialTransport`] provides the real port.
//!
//! ```no_run
//! # #[cfg(feature = "serial")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use ws2300_proto::transport::SerialTransport;
//! use ws2300_proto::Master;
//!
//! let mut station = Master::new(SerialTransport::open("/dev/ttyS0")?);
//! let data = station.read(0x5d8, 3)?;
//! println!("{:02x?}", data);
//! # Ok(()) }
//! # #[cfg(not(feature = "serial"))]
//! # fn main() {}
//! ```

pub mod master;
pub mod node;
pub mod telegram;
pub mod transport;
pub mod types;

pub use master::io::{Error, Master, LIGHT_ADDRESS, LIGHT_BIT};
pub use master::{Data, RetryPolicy};
pub use node::NodeState;
pub use telegram::EncodeMode;
pub use types::{addr, len, Address, IntoAddress, IntoLength, Length, Nibble};
