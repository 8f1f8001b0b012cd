//! Fixed-size serial frame exchanged with the radio peripheral.
//!
//! Every frame is exactly [`FRAME_SIZE`] bytes: a four byte header, the
//! zero padded payload and a little-endian CRC-16/CCITT-FALSE trailer.

use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Total size of a serial frame
pub const FRAME_SIZE: usize = 64;

/// Sync byte marking the start of a frame
pub const SYNC_BYTE: u8 = 0x69;

/// Header size (sync, command, error, length)
pub const HEADER_SIZE: usize = 4;

/// Checksum trailer size
pub const CRC_SIZE: usize = 2;

/// Maximum payload carried by one frame
pub const MAX_FRAME_PAYLOAD: usize = FRAME_SIZE - HEADER_SIZE - CRC_SIZE;

const IDX_SYNC: usize = 0;
const IDX_CMD: usize = 1;
const IDX_ERR: usize = 2;
const IDX_LEN: usize = 3;
const IDX_PAYLOAD: usize = HEADER_SIZE;
const IDX_CRC: usize = FRAME_SIZE - CRC_SIZE;

/// Compute the CRC-16/CCITT-FALSE checksum (poly 0x1021, init 0xFFFF, no reflection)
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    crc16::State::<crc16::CCITT_FALSE>::calculate(data)
}

/// Decoded serial frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command identifier
    pub command: u8,
    /// Error code, 0 means success
    pub error: u8,
    /// Payload without padding
    pub payload: Bytes,
}

impl Frame {
    /// Create a request frame (error byte 0)
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Result<Self, WireError> {
        let payload = payload.into();
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(WireError::Size {
                size: payload.len(),
                limit: MAX_FRAME_PAYLOAD,
            });
        }

        Ok(Self {
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

    /// Encode the frame into its fixed-size wire representation
    pub fn encode(&self) -> Result<Bytes, WireError> {
        if self.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(WireError::Size {
                size: self.payload.len(),
                limit: MAX_FRAME_PAYLOAD,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_SIZE);
        buf.put_u8(SYNC_BYTE);
        buf.put_u8(self.command);
        buf.put_u8(self.error);
        buf.put_u8(self.payload.len() as u8);
        buf.put_slice(&self.payload);
        buf.put_bytes(0, MAX_FRAME_PAYLOAD - self.payload.len());

        let checksum = crc16_ccitt(&buf);
        buf.put_u16_le(checksum);

        Ok(buf.freeze())
    }

    /// Decode exactly one frame from a [`FRAME_SIZE`] byte slice
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != FRAME_SIZE {
            return Err(WireError::Length(bytes.len()));
        }

        if bytes[IDX_SYNC] != SYNC_BYTE {
            return Err(WireError::Sync(bytes[IDX_SYNC]));
        }

        let computed = crc16_ccitt(&bytes[..IDX_CRC]);
        let received = u16::from_le_bytes([bytes[IDX_CRC], bytes[IDX_CRC + 1]]);
        if computed != received {
            return Err(WireError::Crc { computed, received });
        }

        let payload_len = bytes[IDX_LEN] as usize;
        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(WireError::Malformed("frame payload length"));
        }

        Ok(Self {
            command: bytes[IDX_CMD],
            error: bytes[IDX_ERR],
            payload: Bytes::copy_from_slice(&bytes[IDX_PAYLOAD..IDX_PAYLOAD + payload_len]),
        })
    }
}

/// Encode a request frame for `command` carrying `payload`
pub fn encode(command: u8, payload: &[u8]) -> Result<Bytes, WireError> {
    Frame::new(command, Bytes::copy_from_slice(payload))?.encode()
}

/// Streaming frame decoder for the serial byte stream.
///
/// Bytes preceding a sync byte are skipped. A candidate frame failing its
/// checks is discarded by advancing a single byte so the decoder can find
/// the next real frame boundary.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    _priv: (),
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one frame from a buffer.
    ///
    /// Returns `Ok(None)` when more data is needed and `Err` when bytes were
    /// discarded; in both error and success cases the buffer has advanced, so
    /// the caller keeps calling until `Ok(None)`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        match buf.iter().position(|&b| b == SYNC_BYTE) {
            None => {
                let first = buf.first().copied();
                buf.clear();
                return match first {
                    Some(b) => Err(WireError::Sync(b)),
                    None => Ok(None),
                };
            }
            Some(0) => {}
            Some(pos) => {
                let first = buf[0];
                buf.advance(pos);
                return Err(WireError::Sync(first));
            }
        }

        if buf.len() < FRAME_SIZE {
            return Ok(None);
        }

        match Frame::decode(&buf[..FRAME_SIZE]) {
            Ok(frame) => {
                buf.advance(FRAME_SIZE);
                Ok(Some(frame))
            }
            Err(e) => {
                buf.advance(1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_vectors() {
        assert_eq!(crc16_ccitt(&[1, 2, 3, 4]), 35267);
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_encode_known_frame() {
        let bytes = encode(2, &[0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16]).unwrap();
        let expected = [
            vec![0x69, 2, 0, 7, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16],
            vec![0x00; 51],
            vec![0x28, 0xDB],
        ]
        .concat();
        assert_eq!(bytes.len(), FRAME_SIZE);
        assert_eq!(bytes.as_ref(), expected.as_slice());

        // No padding when the payload fills the frame
        let bytes = encode(2, &[0x00; MAX_FRAME_PAYLOAD]).unwrap();
        let expected = [
            vec![0x69, 2, 0, MAX_FRAME_PAYLOAD as u8],
            vec![0x00; MAX_FRAME_PAYLOAD],
            vec![0x63, 0x4C],
        ]
        .concat();
        assert_eq!(bytes.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_decode_known_frame() {
        let bytes = [
            vec![0x69, 2, 3, 7, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16],
            vec![0x00; 51],
            vec![0xD8, 0x06],
        ]
        .concat();
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.command, 2);
        assert_eq!(frame.error, 3);
        assert_eq!(frame.payload.as_ref(), &[0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16]);
    }

    #[test]
    fn test_roundtrip_payload_lengths() {
        for len in [0usize, 1, 32, MAX_FRAME_PAYLOAD] {
            let payload: Vec<u8> = (0..len as u8).collect();
            let bytes = encode(0x30, &payload).unwrap();
            let frame = Frame::decode(&bytes).unwrap();
            assert_eq!(frame.command, 0x30);
            assert_eq!(frame.error, 0);
            assert_eq!(frame.payload.as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let err = encode(0x30, &[0u8; MAX_FRAME_PAYLOAD + 1]).unwrap_err();
        assert_eq!(
            err,
            WireError::Size {
                size: MAX_FRAME_PAYLOAD + 1,
                limit: MAX_FRAME_PAYLOAD
            }
        );
    }

    #[test]
    fn test_single_byte_corruption_detected() {
        let bytes = encode(0x10, &[1, 2, 3]).unwrap();
        for idx in 0..FRAME_SIZE {
            let mut corrupted = bytes.to_vec();
            corrupted[idx] ^= 0x5A;
            assert!(
                Frame::decode(&corrupted).is_err(),
                "corruption at byte {} not detected",
                idx
            );
        }
    }

    #[test]
    fn test_wrong_length_rejected() {
        let bytes = encode(0x10, &[]).unwrap();
        assert_eq!(
            Frame::decode(&bytes[..FRAME_SIZE - 1]),
            Err(WireError::Length(FRAME_SIZE - 1))
        );
    }

    #[test]
    fn test_decoder_resyncs_after_garbage() {
        let frame_bytes = encode(0x81, &[9, 8, 7]).unwrap();

        let mut buf = BytesMut::new();
        buf.put_slice(&[0x00, 0x13, 0x37]);
        buf.put_slice(&frame_bytes);

        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.decode(&mut buf), Err(WireError::Sync(0x00)));
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.command, 0x81);
        assert_eq!(frame.payload.as_ref(), &[9, 8, 7]);
        assert_eq!(decoder.decode(&mut buf), Ok(None));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_skips_corrupted_frame() {
        let mut corrupted = encode(0x30, &[1]).unwrap().to_vec();
        corrupted[10] ^= 0xFF;
        let good = encode(0x10, &[1, 2, 3]).unwrap();

        let mut buf = BytesMut::new();
        buf.put_slice(&corrupted);
        buf.put_slice(&good);

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        let mut errors = 0;
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(_) => errors += 1,
            }
        }

        assert!(errors >= 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x10);
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let bytes = encode(0x10, &[1, 2, 3]).unwrap();
        let mut buf = BytesMut::from(&bytes[..40]);
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.decode(&mut buf), Ok(None));
        buf.put_slice(&bytes[40..]);
        assert!(decoder.decode(&mut buf).unwrap().is_some());
    }
}
