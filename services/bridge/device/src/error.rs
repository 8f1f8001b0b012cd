//! Device error types.

use esb_routing::{CorrelationError, RouterError};
use esb_wire::WireError;
use thiserror::Error;

/// Errors raised by the serial transport and radio API
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device is not open (never opened, closed, or the link went away)
    #[error("device not connected")]
    NotConnected,

    /// Opening, reading or writing the serial device failed
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Payload exceeds a fixed format limit
    #[error("payload size {size} exceeds limit {limit}")]
    Size {
        /// Offending payload length
        size: usize,
        /// Format limit
        limit: usize,
    },

    /// No matching answer before the deadline
    #[error("timed out waiting for answer to command 0x{0:02x}")]
    Timeout(u8),

    /// Answer carried another command than the request
    #[error("answer command mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    CommandMismatch {
        /// Command of the request
        expected: u8,
        /// Command of the answer
        actual: u8,
    },

    /// Peripheral answered with a non-zero error byte
    #[error("peripheral error 0x{0:02x}")]
    Peripheral(u8),

    /// Listener channel is absent or closed
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] RouterError),

    /// Answer payload could not be parsed
    #[error("malformed answer: {0}")]
    Malformed(WireError),
}

impl From<WireError> for DeviceError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Size { size, limit } => DeviceError::Size { size, limit },
            other => DeviceError::Malformed(other),
        }
    }
}

impl From<CorrelationError> for DeviceError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::Timeout(command) => DeviceError::Timeout(command),
            CorrelationError::CommandMismatch { expected, actual } => {
                DeviceError::CommandMismatch { expected, actual }
            }
            CorrelationError::Closed => DeviceError::NotConnected,
        }
    }
}
