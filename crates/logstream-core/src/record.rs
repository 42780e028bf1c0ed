//! Record Framing
//!
//! The on-disk and on-wire unit of logstream is the record:
//!
//! ```text
//! +-------------------+------------------+---------------------------+
//! | Length (4B, BE)   | Payload          | CRC32 trailer (4B, opt.)  |
//! +-------------------+------------------+---------------------------+
//! ```
//!
//! The length covers payload plus trailer. A zero length field is the
//! "nothing written here yet" sentinel: segment files are pre-zeroed, so a
//! reader that lands on unwritten space sees length 0 and knows to wait.
//! Zero is therefore never a valid record length.
//!
//! The trailer, when present, is the big-endian CRC32 of the payload. The
//! frame does not say whether a trailer exists; producers and consumers
//! agree on it out of band (the broker's checksum setting).

use crate::error::{Error, Result};

/// Size of the big-endian length prefix.
pub const LEN_PREFIX: usize = 4;

/// Size of the optional CRC32 trailer.
pub const CHECKSUM_LEN: usize = 4;

/// CRC32 of `payload` as the big-endian trailer bytes.
pub fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    crc32fast::hash(payload).to_be_bytes()
}

/// Whether `trailer` is the CRC32 of `payload`.
pub fn checksum_matches(payload: &[u8], trailer: &[u8]) -> bool {
    trailer.len() == CHECKSUM_LEN && trailer == checksum(payload)
}

/// Validate a publish before anything is written.
///
/// Empty payloads are never valid. A supplied checksum must be exactly
/// [`CHECKSUM_LEN`] bytes and must verify against the payload.
pub fn validate_publish(payload: &[u8], checksum_bytes: Option<&[u8]>) -> Result<()> {
    if payload.is_empty() {
        return Err(Error::EmptyPayload);
    }
    if let Some(trailer) = checksum_bytes {
        if trailer.len() != CHECKSUM_LEN {
            return Err(Error::InvalidChecksumLength {
                expected: CHECKSUM_LEN,
                actual: trailer.len(),
            });
        }
        if !checksum_matches(payload, trailer) {
            return Err(Error::ChecksumMismatch);
        }
    }
    Ok(())
}

/// Total encoded size of a record whose body (payload + trailer) is
/// `body_len` bytes.
pub fn encoded_len(body_len: usize) -> usize {
    LEN_PREFIX + body_len
}

/// Result of peeking a buffer at a record boundary.
#[derive(Debug, PartialEq, Eq)]
pub enum RecordView<'a> {
    /// Zero length prefix: nothing has been written at this position yet.
    Empty,
    /// The position is past the end of the buffer, or the stated length
    /// runs past it. Nothing readable here.
    OutOfBounds,
    /// A complete record body (payload plus any trailer).
    Record { body: &'a [u8] },
}

impl<'a> RecordView<'a> {
    /// Peek the record starting at `pos` in `buf`.
    pub fn parse(buf: &'a [u8], pos: usize) -> RecordView<'a> {
        if pos + LEN_PREFIX > buf.len() {
            return RecordView::OutOfBounds;
        }
        let len_bytes: [u8; LEN_PREFIX] = buf[pos..pos + LEN_PREFIX].try_into().unwrap();
        let body_len = u32::from_be_bytes(len_bytes) as usize;
        if body_len == 0 {
            return RecordView::Empty;
        }
        let start = pos + LEN_PREFIX;
        let end = start + body_len;
        if end > buf.len() {
            return RecordView::OutOfBounds;
        }
        RecordView::Record {
            body: &buf[start..end],
        }
    }

    /// The full encoded size of this record, if it is one.
    pub fn encoded_len(&self) -> Option<usize> {
        match self {
            RecordView::Record { body } => Some(encoded_len(body.len())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_checksum_roundtrip() {
        let payload = b"hello logstream";
        let crc = checksum(payload);
        assert!(checksum_matches(payload, &crc));
        assert!(!checksum_matches(b"other payload", &crc));
    }

    #[test]
    fn test_checksum_wrong_length_never_matches() {
        assert!(!checksum_matches(b"x", b"abc"));
        assert!(!checksum_matches(b"x", b"abcde"));
    }

    #[test]
    fn test_validate_publish_ok() {
        assert!(validate_publish(b"payload", None).is_ok());
        let crc = checksum(b"payload");
        assert!(validate_publish(b"payload", Some(&crc)).is_ok());
    }

    #[test]
    fn test_validate_publish_empty_payload() {
        assert!(matches!(
            validate_publish(b"", None),
            Err(Error::EmptyPayload)
        ));
    }

    #[test]
    fn test_validate_publish_bad_checksum_length() {
        let err = validate_publish(b"payload", Some(b"abc")).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidChecksumLength {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_validate_publish_checksum_mismatch() {
        let wrong = checksum(b"something else");
        assert!(matches!(
            validate_publish(b"payload", Some(&wrong)),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_parse_record() {
        let buf = frame(b"abc");
        match RecordView::parse(&buf, 0) {
            RecordView::Record { body } => assert_eq!(body, b"abc"),
            other => panic!("unexpected view: {:?}", other),
        }
    }

    #[test]
    fn test_parse_zero_length_is_empty() {
        // Pre-zeroed space reads as the sentinel.
        let buf = [0u8; 64];
        assert_eq!(RecordView::parse(&buf, 0), RecordView::Empty);
        assert_eq!(RecordView::parse(&buf, 32), RecordView::Empty);
    }

    #[test]
    fn test_parse_out_of_bounds() {
        let buf = frame(b"abc");
        // Past the end entirely.
        assert_eq!(RecordView::parse(&buf, buf.len()), RecordView::OutOfBounds);
        // Length prefix would straddle the end.
        assert_eq!(
            RecordView::parse(&buf, buf.len() - 2),
            RecordView::OutOfBounds
        );
    }

    #[test]
    fn test_parse_truncated_body() {
        let mut buf = frame(b"abcdef");
        buf.truncate(buf.len() - 3);
        assert_eq!(RecordView::parse(&buf, 0), RecordView::OutOfBounds);
    }

    #[test]
    fn test_encoded_len_matches_parse() {
        let buf = frame(b"hello");
        let view = RecordView::parse(&buf, 0);
        assert_eq!(view.encoded_len(), Some(buf.len()));
        assert_eq!(encoded_len(5), 9);
    }

    #[test]
    fn test_sequential_records() {
        let mut buf = frame(b"a");
        buf.extend_from_slice(&frame(b"bb"));
        buf.extend_from_slice(&[0u8; 16]); // unwritten tail

        let first = RecordView::parse(&buf, 0);
        let first_len = first.encoded_len().unwrap();
        assert_eq!(first_len, 5);

        match RecordView::parse(&buf, first_len) {
            RecordView::Record { body } => assert_eq!(body, b"bb"),
            other => panic!("unexpected view: {:?}", other),
        }
        let second_len = RecordView::parse(&buf, first_len).encoded_len().unwrap();
        assert_eq!(RecordView::parse(&buf, first_len + second_len), RecordView::Empty);
    }
}
