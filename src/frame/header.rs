//! # Frame Header
//!
//! Every binary message on the stream starts with a fixed 16-byte header:
//!
//! ```text
//! offset  size  field      encoding
//! 0       8     timestamp  i64, little-endian
//! 8       8     duration   i64, little-endian
//! 16      N     payload    H.264 byte-stream, NAL aligned
//! ```
//!
//! Messages shorter than the header are not frames; [`FrameHeader::parse`]
//! returns `None` for them and the caller drops the message.

use bytes::{Buf, BufMut};

/// Size of the header in bytes.
pub const FRAME_HEADER_LEN: usize = 16;

/// Presentation timing attached to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameHeader {
    pub timestamp: i64,
    pub duration: i64,
}

impl FrameHeader {
    pub fn new(timestamp: i64, duration: i64) -> Self {
        Self {
            timestamp,
            duration,
        }
    }

    /// Read the header from the front of `message`.
    pub fn parse(message: &[u8]) -> Option<Self> {
        if message.len() < FRAME_HEADER_LEN {
            return None;
        }
        let mut cursor = &message[..FRAME_HEADER_LEN];
        Some(Self {
            timestamp: cursor.get_i64_le(),
            duration: cursor.get_i64_le(),
        })
    }

    /// Split `message` into its header and a borrowed payload slice.
    pub fn split(message: &[u8]) -> Option<(Self, &[u8])> {
        let header = Self::parse(message)?;
        Some((header, &message[FRAME_HEADER_LEN..]))
    }

    /// Append the encoded header to `dst`.
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_i64_le(self.timestamp);
        dst.put_i64_le(self.duration);
    }

    /// Build a complete message: header followed by `payload`.
    pub fn frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        self.encode(&mut out);
        out.extend_from_slice(payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_parse_little_endian() {
        let mut message = Vec::new();
        message.extend_from_slice(&1_000_000i64.to_le_bytes());
        message.extend_from_slice(&33_333i64.to_le_bytes());
        message.extend_from_slice(&[0, 0, 0, 1, 0x65]);

        let (header, payload) = FrameHeader::split(&message).unwrap();
        assert_eq!(header.timestamp, 1_000_000);
        assert_eq!(header.duration, 33_333);
        assert_eq!(payload, &[0, 0, 0, 1, 0x65]);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(8)]
    #[case(15)]
    fn test_short_message_is_rejected(#[case] len: usize) {
        let message = vec![0xAAu8; len];
        assert!(FrameHeader::parse(&message).is_none());
        assert!(FrameHeader::split(&message).is_none());
    }

    #[test]
    fn test_header_only_message_has_empty_payload() {
        let message = FrameHeader::new(-1, i64::MAX).frame(&[]);
        assert_eq!(message.len(), FRAME_HEADER_LEN);
        let (header, payload) = FrameHeader::split(&message).unwrap();
        assert_eq!(header, FrameHeader::new(-1, i64::MAX));
        assert!(payload.is_empty());
    }

    proptest! {
        #[test]
        fn prop_frame_then_split_yields_inputs(
            timestamp in any::<i64>(),
            duration in any::<i64>(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let message = FrameHeader::new(timestamp, duration).frame(&payload);
            prop_assert!(message.len() >= FRAME_HEADER_LEN);

            let (header, body) = FrameHeader::split(&message).unwrap();
            prop_assert_eq!(header.timestamp, timestamp);
            prop_assert_eq!(header.duration, duration);
            prop_assert_eq!(body, &payload[..]);
        }
    }
}
