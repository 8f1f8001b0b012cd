//! Serial frame codec, radio message layout and bridge TCP packets for esb-bridge.
//!
//! This crate holds every byte-level format the bridge speaks: the fixed-size
//! CRC protected frame exchanged with the nRF52 peripheral over USB serial,
//! the radio message carried inside those frames, and the small length
//! prefixed packets of the outward TCP bridge protocol.
//!
//! ## Serial Frame
//!
//! ```text
//! +------+-----+-----+-----+---------------------+-----------+
//! | 0    | 1   | 2   | 3   | 4 .. 4+len          | 62 .. 64  |
//! +------+-----+-----+-----+---------------------+-----------+
//! | 0x69 | cmd | err | len | payload (zero pad)  | crc16 LE  |
//! +------+-----+-----+-----+---------------------+-----------+
//! ```
//!
//! The checksum is CRC-16/CCITT-FALSE over bytes `0..62`.
//!
//! ## Bridge Packets
//!
//! ```text
//! request: | cmd | len | payload |
//! answer:  | cmd | err | len | payload |
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod command;
pub mod error;
pub mod frame;
pub mod radio;
pub mod version;

// Re-export main types
pub use bridge::{
    BridgeAnswer, BridgeRequest, BRIDGE_ANSWER_HEADER_SIZE, BRIDGE_REQUEST_HEADER_SIZE,
    MAX_BRIDGE_PAYLOAD,
};
pub use command::{BridgeCommand, BridgeStatus, Command};
pub use error::WireError;
pub use frame::{crc16_ccitt, Frame, FrameDecoder, FRAME_SIZE, MAX_FRAME_PAYLOAD, SYNC_BYTE};
pub use radio::{
    Address, ListenFilter, RadioMessage, ADDRESS_SIZE, MAX_RADIO_PAYLOAD, WILDCARD_COMMAND,
};
pub use version::FirmwareVersion;
