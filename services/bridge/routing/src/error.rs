//! Routing error types.

use thiserror::Error;

/// Errors while waiting for a correlated reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// No reply arrived before the deadline
    #[error("timed out waiting for reply to command 0x{0:02x}")]
    Timeout(u8),

    /// The first reply carried a different command
    #[error("reply command mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    CommandMismatch {
        /// Command of the outstanding request
        expected: u8,
        /// Command of the reply that arrived
        actual: u8,
    },

    /// The pending request was cancelled or replaced
    #[error("pending request closed")]
    Closed,
}

/// Listener registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Delivery channel is absent or already closed
    #[error("invalid delivery channel")]
    InvalidChannel,
}
