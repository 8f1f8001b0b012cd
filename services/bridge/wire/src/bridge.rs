//! Packets of the outward TCP bridge protocol.
//!
//! Requests carry a two byte header, answers and notifications a three byte
//! header. Both are length prefixed with a single byte, so payloads are
//! limited to 255 bytes.

use crate::{BridgeCommand, BridgeStatus, ListenFilter, RadioMessage, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Request header size (cmd, len)
pub const BRIDGE_REQUEST_HEADER_SIZE: usize = 2;

/// Answer header size (cmd, err, len)
pub const BRIDGE_ANSWER_HEADER_SIZE: usize = 3;

/// Maximum payload of a bridge packet
pub const MAX_BRIDGE_PAYLOAD: usize = u8::MAX as usize;

/// Request sent by a bridge client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    /// Bridge command
    pub command: u8,
    /// Request payload
    pub payload: Bytes,
}

impl BridgeRequest {
    /// Create a request
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Transfer request for a radio message
    pub fn transfer(msg: &RadioMessage) -> Result<Self, WireError> {
        Ok(Self::new(
            BridgeCommand::Transfer.as_u8(),
            msg.encode_addressed()?,
        ))
    }

    /// Listener registration request
    pub fn register_listener(filter: &ListenFilter) -> Self {
        Self::new(BridgeCommand::RegisterListener.as_u8(), filter.encode())
    }

    /// Encode the request
    pub fn encode(&self) -> Result<Bytes, WireError> {
        check_payload(self.payload.len())?;
        let mut buf = BytesMut::with_capacity(BRIDGE_REQUEST_HEADER_SIZE + self.payload.len());
        buf.put_u8(self.command);
        buf.put_u8(self.payload.len() as u8);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode one request from a stream buffer, `Ok(None)` if incomplete
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, WireError> {
        if buf.len() < BRIDGE_REQUEST_HEADER_SIZE {
            return Ok(None);
        }
        let len = buf[1] as usize;
        if buf.len() < BRIDGE_REQUEST_HEADER_SIZE + len {
            return Ok(None);
        }

        let command = buf.get_u8();
        buf.advance(1);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Self { command, payload }))
    }
}

/// Answer or notification sent by the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeAnswer {
    /// Bridge command
    pub command: u8,
    /// Error byte, 0 on success
    pub error: u8,
    /// Answer payload
    pub payload: Bytes,
}

impl BridgeAnswer {
    /// Create an answer
    pub fn new(command: u8, error: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            error,
            payload: payload.into(),
        }
    }

    /// Successful answer
    pub fn ok(command: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(command, BridgeStatus::Ok.as_u8(), payload)
    }

    /// Failed answer with an empty payload
    pub fn failure(command: u8, error: u8) -> Self {
        Self::new(command, error, Bytes::new())
    }

    /// Notification carrying a pushed radio message
    pub fn notification(msg: &RadioMessage) -> Result<Self, WireError> {
        Ok(Self::ok(
            BridgeCommand::Notification.as_u8(),
            msg.encode_addressed()?,
        ))
    }

    /// Whether this packet is an unsolicited notification
    pub fn is_notification(&self) -> bool {
        self.command == BridgeCommand::Notification.as_u8()
    }

    /// Encode the answer
    pub fn encode(&self) -> Result<Bytes, WireError> {
        check_payload(self.payload.len())?;
        let mut buf = BytesMut::with_capacity(BRIDGE_ANSWER_HEADER_SIZE + self.payload.len());
        buf.put_u8(self.command);
        buf.put_u8(self.error);
        buf.put_u8(self.payload.len() as u8);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode one answer from a stream buffer, `Ok(None)` if incomplete
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, WireError> {
        if buf.len() < BRIDGE_ANSWER_HEADER_SIZE {
            return Ok(None);
        }
        let len = buf[2] as usize;
        if buf.len() < BRIDGE_ANSWER_HEADER_SIZE + len {
            return Ok(None);
        }

        let command = buf.get_u8();
        let error = buf.get_u8();
        buf.advance(1);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Self {
            command,
            error,
            payload,
        }))
    }
}

fn check_payload(len: usize) -> Result<(), WireError> {
    if len > MAX_BRIDGE_PAYLOAD {
        return Err(WireError::Size {
            size: len,
            limit: MAX_BRIDGE_PAYLOAD,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Address;

    const ADDR: Address = Address::new([111, 111, 111, 111, 1]);

    #[test]
    fn test_transfer_request_layout() {
        let msg = RadioMessage::new(ADDR, 0x10, vec![0xAA]).unwrap();
        let bytes = BridgeRequest::transfer(&msg).unwrap().encode().unwrap();
        assert_eq!(bytes.as_ref(), &[0x10, 7, 111, 111, 111, 111, 1, 0x10, 0xAA]);
    }

    #[test]
    fn test_register_listener_layout() {
        let filter = ListenFilter::new(ADDR, 0xFF);
        let bytes = BridgeRequest::register_listener(&filter).encode().unwrap();
        assert_eq!(bytes.as_ref(), &[0x20, 6, 111, 111, 111, 111, 1, 0xFF]);
    }

    #[test]
    fn test_notification_layout() {
        let msg = RadioMessage::new(ADDR, 0x42, vec![1, 2]).unwrap();
        let answer = BridgeAnswer::notification(&msg).unwrap();
        assert!(answer.is_notification());
        let bytes = answer.encode().unwrap();
        assert_eq!(bytes.as_ref(), &[0x21, 0, 8, 111, 111, 111, 111, 1, 0x42, 1, 2]);
    }

    #[test]
    fn test_streaming_request_decode() {
        let first = BridgeRequest::new(0x10, vec![1, 2, 3]).encode().unwrap();
        let second = BridgeRequest::new(0x20, Bytes::new()).encode().unwrap();

        let mut buf = BytesMut::new();
        buf.put_slice(&first[..2]);
        assert_eq!(BridgeRequest::decode(&mut buf).unwrap(), None);

        buf.put_slice(&first[2..]);
        buf.put_slice(&second);
        let req = BridgeRequest::decode(&mut buf).unwrap().unwrap();
        assert_eq!(req.command, 0x10);
        assert_eq!(req.payload.as_ref(), &[1, 2, 3]);

        let req = BridgeRequest::decode(&mut buf).unwrap().unwrap();
        assert_eq!(req.command, 0x20);
        assert!(req.payload.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_streaming_answer_decode() {
        let bytes = BridgeAnswer::failure(0x10, BridgeStatus::PayloadSize.as_u8())
            .encode()
            .unwrap();
        assert_eq!(bytes.as_ref(), &[0x10, 0x01, 0x00]);

        let mut buf = BytesMut::from(&bytes[..2]);
        assert_eq!(BridgeAnswer::decode(&mut buf).unwrap(), None);
        buf.put_slice(&bytes[2..]);
        let answer = BridgeAnswer::decode(&mut buf).unwrap().unwrap();
        assert_eq!(answer.error, 0x01);
        assert!(answer.payload.is_empty());
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let req = BridgeRequest::new(0x10, vec![0u8; MAX_BRIDGE_PAYLOAD + 1]);
        assert!(req.encode().is_err());
    }
}
