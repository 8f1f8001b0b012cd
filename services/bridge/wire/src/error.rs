//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Payload exceeds the limit of the format it is encoded into
    #[error("payload size {size} exceeds limit {limit}")]
    Size {
        /// Offending payload length
        size: usize,
        /// Maximum allowed by the format
        limit: usize,
    },

    /// Frame does not start with the sync byte
    #[error("sync byte mismatch: 0x{0:02X}")]
    Sync(u8),

    /// Frame checksum mismatch
    #[error("crc mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    Crc {
        /// Checksum computed over the received bytes
        computed: u16,
        /// Checksum carried by the frame
        received: u16,
    },

    /// Buffer has the wrong total length for a fixed-size frame
    #[error("invalid frame length {0}")]
    Length(usize),

    /// Malformed frame or payload structure
    #[error("malformed {0}")]
    Malformed(&'static str),
}
