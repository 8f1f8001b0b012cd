//! Bridge error types.

use esb_device::DeviceError;
use esb_routing::{CorrelationError, RouterError};
use esb_wire::WireError;
use thiserror::Error;

/// Bridge protocol errors
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Socket I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet could not be encoded or decoded
    #[error("wire error: {0}")]
    Wire(WireError),

    /// Payload exceeds a fixed format limit
    #[error("payload size {size} exceeds limit {limit}")]
    Size {
        /// Offending payload length
        size: usize,
        /// Format limit
        limit: usize,
    },

    /// The bridge connection is closed
    #[error("bridge not connected")]
    NotConnected,

    /// No answer before the deadline
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

    /// The bridge answered with a non-zero error byte
    #[error("bridge answered with error 0x{0:02x}")]
    Remote(u8),

    /// The radio target answered with a non-zero error byte
    #[error("peripheral answered with error 0x{0:02x}")]
    Peripheral(u8),

    /// Listener channel is absent or closed
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] RouterError),

    /// Device failure
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

impl From<WireError> for BridgeError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Size { size, limit } => BridgeError::Size { size, limit },
            other => BridgeError::Wire(other),
        }
    }
}

impl From<CorrelationError> for BridgeError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::Timeout(command) => BridgeError::Timeout(command),
            CorrelationError::CommandMismatch { expected, actual } => {
                BridgeError::CommandMismatch { expected, actual }
            }
            CorrelationError::Closed => BridgeError::NotConnected,
        }
    }
}
