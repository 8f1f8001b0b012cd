//! Serial transport and radio API for the nRF52 ESB peripheral.
//!
//! [`SerialTransport`] owns the byte stream to the peripheral and runs the
//! background reader that splits incoming frames into correlated answers and
//! radio pushes. [`EsbDevice`] layers the radio commands on top of it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod esb;
pub mod transport;

pub use error::DeviceError;
pub use esb::EsbDevice;
pub use transport::{DeviceConfig, SerialTransport, TransportStats};
