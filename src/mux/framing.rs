//! Fixed-size wire record codec.
//!
//! Every frame occupies exactly [`RECORD_LEN`] bytes on the link:
//!
//! ```text
//! [u32 LE id][u32 LE status][u32 LE length][payload: 500 bytes]
//! ```
//!
//! Only the first `length` payload bytes are meaningful; the rest of the
//! region is zero-filled so records are byte-for-byte deterministic.

use bytes::{Buf, BufMut, Bytes};

use crate::constants::{HEADER_LEN, PAYLOAD_CAPACITY, RECORD_LEN};
use crate::error::DecodeError;

/// One chunk of one logical connection's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Logical connection id.
    pub id: u32,
    /// Reserved, always 0 today.
    pub status: u32,
    /// Meaningful payload bytes. Zero means "derive from payload" on encode.
    pub length: u32,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Build a data frame whose length matches the payload.
    pub fn data(id: u32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            id,
            status: 0,
            length: payload.len() as u32,
            payload,
        }
    }

    /// Encode into a full wire record.
    ///
    /// Payloads longer than [`PAYLOAD_CAPACITY`] are truncated and the
    /// length is forced to the capacity. Only the first `length` payload
    /// bytes are copied; everything after them stays zero. The frame itself
    /// is not modified, so encoding twice yields identical records.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let available = self.payload.len().min(PAYLOAD_CAPACITY);
        let length = if self.payload.len() > PAYLOAD_CAPACITY {
            PAYLOAD_CAPACITY as u32
        } else if self.length == 0 {
            available as u32
        } else {
            self.length.min(PAYLOAD_CAPACITY as u32)
        };
        let body = &self.payload[..available.min(length as usize)];

        let mut record = [0u8; RECORD_LEN];
        let mut cursor = &mut record[..];
        cursor.put_u32_le(self.id);
        cursor.put_u32_le(self.status);
        cursor.put_u32_le(length);
        cursor.put_slice(body);
        record
    }

    /// Decode a wire record.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the buffer is shorter than the header or
    /// than the header plus the declared payload length.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::ShortHeader { len: buf.len() });
        }

        let mut header = &buf[..HEADER_LEN];
        let id = header.get_u32_le();
        let status = header.get_u32_le();
        let length = header.get_u32_le();

        let available = buf.len() - HEADER_LEN;
        let end = usize::try_from(length)
            .ok()
            .filter(|len| *len <= available)
            .ok_or(DecodeError::PayloadOverrun { length, available })?;

        Ok(Self {
            id,
            status,
            length,
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + end]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let frame = Frame {
            id: 56789,
            status: 54321,
            length: 12,
            payload: Bytes::from_static(b"hello, world"),
        };
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let frame = Frame::data(7, Bytes::new());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.length, 0);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_full_capacity_round_trip() {
        let frame = Frame::data(1, vec![0xAB; PAYLOAD_CAPACITY]);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_zero_length_is_derived_from_payload() {
        let frame = Frame {
            id: 3,
            status: 0,
            length: 0,
            payload: Bytes::from_static(b"abc"),
        };
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.length, 3);
        assert_eq!(&decoded.payload[..], b"abc");
    }

    #[test]
    fn test_oversized_payload_is_truncated() {
        let payload: Vec<u8> = (0..700u32).map(|i| (i % 251) as u8).collect();
        let frame = Frame::data(9, payload.clone());

        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.length, PAYLOAD_CAPACITY as u32);
        assert_eq!(&decoded.payload[..], &payload[..PAYLOAD_CAPACITY]);
    }

    #[test]
    fn test_encode_is_idempotent() {
        let frame = Frame::data(42, vec![1u8; 900]);
        assert_eq!(frame.encode(), frame.encode());
        // Encoding must not have rewritten the frame.
        assert_eq!(frame.payload.len(), 900);
    }

    #[test]
    fn test_header_is_little_endian() {
        let record = Frame::data(0x0403_0201, Bytes::from_static(b"xy")).encode();
        assert_eq!(&record[0..4], &[1, 2, 3, 4]);
        assert_eq!(&record[4..8], &[0, 0, 0, 0]);
        assert_eq!(&record[8..12], &[2, 0, 0, 0]);
        assert_eq!(&record[12..14], b"xy");
    }

    #[test]
    fn test_payload_tail_is_zero_filled() {
        let record = Frame::data(5, Bytes::from_static(b"data")).encode();
        assert!(record[HEADER_LEN + 4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_bytes_past_declared_length_are_zeroed() {
        let frame = Frame {
            id: 5,
            status: 0,
            length: 3,
            payload: Bytes::from_static(b"abcdef"),
        };
        let record = frame.encode();
        assert_eq!(&record[HEADER_LEN..HEADER_LEN + 3], b"abc");
        assert!(record[HEADER_LEN + 3..].iter().all(|b| *b == 0));

        let decoded = Frame::decode(&record).unwrap();
        assert_eq!(decoded.length, 3);
        assert_eq!(&decoded.payload[..], b"abc");
    }

    #[test]
    fn test_short_header_rejected() {
        assert_eq!(
            Frame::decode(&[0u8; 11]),
            Err(DecodeError::ShortHeader { len: 11 })
        );
    }

    #[test]
    fn test_length_past_record_rejected() {
        let mut record = [0u8; RECORD_LEN];
        record[8..12].copy_from_slice(&501u32.to_le_bytes());
        assert!(matches!(
            Frame::decode(&record),
            Err(DecodeError::PayloadOverrun { length: 501, .. })
        ));
    }

    #[test]
    fn test_short_buffer_with_valid_length() {
        // Header claims 10 bytes but only 4 follow.
        let mut buf = vec![0u8; HEADER_LEN + 4];
        buf[8..12].copy_from_slice(&10u32.to_le_bytes());
        assert!(Frame::decode(&buf).is_err());
    }
}
