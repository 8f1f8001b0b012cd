//! Radio message layout and listener filters.
//!
//! A radio message is addressed to a 5 byte pipeline address and carries a
//! command byte, an error byte (answers only) and up to
//! [`MAX_RADIO_PAYLOAD`] bytes of application data. The same message shows
//! up in several byte layouts:
//!
//! ```text
//! addressed (transfer request, bridge notification): | addr[5] | cmd | data |
//! answer (transfer answer):                          | cmd | err | data |
//! push (radio receive frame):                        | cmd | err | addr[5] | data |
//! ```

use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size of a pipeline address
pub const ADDRESS_SIZE: usize = 5;

/// Maximum application payload carried over the radio
pub const MAX_RADIO_PAYLOAD: usize = 32;

/// Command filter matching every command
pub const WILDCARD_COMMAND: u8 = 0xFF;

/// Pipeline address of a radio endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    /// The zero address, used as "any source" in listener filters
    pub const ZERO: Address = Address([0; ADDRESS_SIZE]);

    /// Create an address from its bytes
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Read an address from the first [`ADDRESS_SIZE`] bytes of a slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        let raw: [u8; ADDRESS_SIZE] = bytes
            .get(..ADDRESS_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(WireError::Malformed("pipeline address"))?;
        Ok(Self(raw))
    }

    /// Address bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Whether this is the zero address
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl From<[u8; ADDRESS_SIZE]> for Address {
    fn from(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e)
    }
}

impl FromStr for Address {
    type Err = WireError;

    /// Parse `de:ad:be:ef:01` style addresses
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut raw = [0u8; ADDRESS_SIZE];
        let mut parts = s.trim().split(':');
        for byte in raw.iter_mut() {
            let part = parts.next().ok_or(WireError::Malformed("pipeline address"))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| WireError::Malformed("pipeline address"))?;
        }
        if parts.next().is_some() {
            return Err(WireError::Malformed("pipeline address"));
        }
        Ok(Self(raw))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Application level radio message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioMessage {
    /// Pipeline address (target for requests, source for pushes)
    pub address: Address,
    /// Radio command
    pub command: u8,
    /// Error code reported by the peripheral, 0 on success
    pub error: u8,
    /// Application payload
    pub payload: Bytes,
}

impl RadioMessage {
    /// Create a message, rejecting payloads over [`MAX_RADIO_PAYLOAD`]
    pub fn new(
        address: Address,
        command: u8,
        payload: impl Into<Bytes>,
    ) -> Result<Self, WireError> {
        let payload = payload.into();
        check_payload(payload.len())?;
        Ok(Self {
            address,
            command,
            error: 0,
            payload,
        })
    }

    /// Set the error byte
    pub fn with_error(mut self, error: u8) -> Self {
        self.error = error;
        self
    }

    /// Encode as `addr | cmd | data`
    pub fn encode_addressed(&self) -> Result<Bytes, WireError> {
        check_payload(self.payload.len())?;
        let mut buf = BytesMut::with_capacity(ADDRESS_SIZE + 1 + self.payload.len());
        buf.put_slice(self.address.as_bytes());
        buf.put_u8(self.command);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode `addr | cmd | data`
    pub fn decode_addressed(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < ADDRESS_SIZE + 1 {
            return Err(WireError::Malformed("addressed radio message"));
        }
        let address = Address::from_slice(bytes)?;
        Self::new(
            address,
            bytes[ADDRESS_SIZE],
            Bytes::copy_from_slice(&bytes[ADDRESS_SIZE + 1..]),
        )
    }

    /// Encode as `cmd | err | data`
    pub fn encode_answer(&self) -> Result<Bytes, WireError> {
        check_payload(self.payload.len())?;
        let mut buf = BytesMut::with_capacity(2 + self.payload.len());
        buf.put_u8(self.command);
        buf.put_u8(self.error);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode `cmd | err | data`; the answer does not carry the address
    pub fn decode_answer(address: Address, bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < 2 {
            return Err(WireError::Malformed("radio answer"));
        }
        Ok(Self::new(address, bytes[0], Bytes::copy_from_slice(&bytes[2..]))?.with_error(bytes[1]))
    }

    /// Encode as `cmd | err | addr | data`
    pub fn encode_push(&self) -> Result<Bytes, WireError> {
        check_payload(self.payload.len())?;
        let mut buf = BytesMut::with_capacity(2 + ADDRESS_SIZE + self.payload.len());
        buf.put_u8(self.command);
        buf.put_u8(self.error);
        buf.put_slice(self.address.as_bytes());
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode `cmd | err | addr | data`
    pub fn decode_push(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < 2 + ADDRESS_SIZE {
            return Err(WireError::Malformed("radio push"));
        }
        let address = Address::from_slice(&bytes[2..])?;
        Ok(Self::new(
            address,
            bytes[0],
            Bytes::copy_from_slice(&bytes[2 + ADDRESS_SIZE..]),
        )?
        .with_error(bytes[1]))
    }
}

fn check_payload(len: usize) -> Result<(), WireError> {
    if len > MAX_RADIO_PAYLOAD {
        return Err(WireError::Size {
            size: len,
            limit: MAX_RADIO_PAYLOAD,
        });
    }
    Ok(())
}

/// Source address and command filter of a listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenFilter {
    /// Source address, [`Address::ZERO`] matches any source
    pub address: Address,
    /// Command, [`WILDCARD_COMMAND`] matches any command
    pub command: u8,
}

impl ListenFilter {
    /// Size of an encoded filter
    pub const ENCODED_SIZE: usize = ADDRESS_SIZE + 1;

    /// Create a filter
    pub const fn new(address: Address, command: u8) -> Self {
        Self { address, command }
    }

    /// Filter matching every message
    pub const fn any() -> Self {
        Self::new(Address::ZERO, WILDCARD_COMMAND)
    }

    /// Whether a message passes this filter
    pub fn matches(&self, msg: &RadioMessage) -> bool {
        (self.command == WILDCARD_COMMAND || self.command == msg.command)
            && (self.address.is_zero() || self.address == msg.address)
    }

    /// Encode as `addr | cmd`
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_SIZE);
        buf.put_slice(self.address.as_bytes());
        buf.put_u8(self.command);
        buf.freeze()
    }

    /// Decode `addr | cmd`, the slice must be exactly [`Self::ENCODED_SIZE`] bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != Self::ENCODED_SIZE {
            return Err(WireError::Size {
                size: bytes.len(),
                limit: Self::ENCODED_SIZE,
            });
        }
        Ok(Self::new(Address::from_slice(bytes)?, bytes[ADDRESS_SIZE]))
    }
}

impl Default for ListenFilter {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for ListenFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.is_zero() {
            write!(f, "*")?;
        } else {
            write!(f, "{}", self.address)?;
        }
        if self.command == WILDCARD_COMMAND {
            write!(f, "/*")
        } else {
            write!(f, "/0x{:02x}", self.command)
        }
    }
}
