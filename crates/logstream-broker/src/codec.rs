//! Wire frame codec
//!
//! Both directions speak the same framing:
//!
//! ```text
//! +------------------+------------------+
//! | Length (4B, BE)  | Payload          |
//! +------------------+------------------+
//! ```
//!
//! A zero length is never a valid payload — on a live stream it is the
//! "nothing here" sentinel, so a peer that sends one is malformed and the
//! connection is dropped. Oversized frames are rejected before buffering.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{BrokerError, BrokerResult};

/// Default maximum frame size (1MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = BrokerError;

    fn decode(&mut self, src: &mut BytesMut) -> BrokerResult<Option<Self::Item>> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = (&src[..4]).get_u32() as usize;
        if length == 0 {
            return Err(BrokerError::Protocol("zero-length frame".to_string()));
        }
        if length > self.max_frame_size {
            return Err(BrokerError::Protocol(format!(
                "frame size {} exceeds maximum {}",
                length, self.max_frame_size
            )));
        }

        let total = 4 + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(4);
        Ok(Some(src.split_to(length)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = BrokerError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> BrokerResult<()> {
        if item.is_empty() || item.len() > self.max_frame_size {
            return Err(BrokerError::Protocol(format!(
                "invalid outbound frame size {}",
                item.len()
            )));
        }
        dst.reserve(4 + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(Bytes::from_static(b"PNG"), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], b"PNG");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for payload in [&b"one"[..], b"two", b"three"] {
            codec.encode(Bytes::copy_from_slice(payload), &mut buf).unwrap();
        }
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"two");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"three");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_incomplete_length_prefix() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_incomplete_payload_waits() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.extend_from_slice(&[0u8; 4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0u8; 6]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_zero_length_frame_is_protocol_error() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(BrokerError::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::with_max_frame_size(16);
        let mut buf = BytesMut::new();
        buf.put_u32(64);
        assert!(codec.decode(&mut buf).is_err());

        let mut dst = BytesMut::new();
        assert!(codec.encode(Bytes::from(vec![0u8; 64]), &mut dst).is_err());
    }

    #[test]
    fn test_binary_payload_roundtrip() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let payload: Vec<u8> = (0..=255).collect();
        codec.encode(Bytes::from(payload.clone()), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], &payload[..]);
    }
}
