//! Offset arithmetic and wire encoding.
//!
//! A stream position is a plain `u64` internally. Over the wire it is an
//! opaque decimal string ("0", "5", ...) — total order and byte alignment
//! must survive whatever encoding an implementation chooses; the reference
//! implementation uses decimal so conformance fixtures stay human-readable.

use std::fmt;

/// Sentinel offset string meaning "the current head at evaluation time".
pub const HEAD_SENTINEL: &str = "-1";

#[derive(Debug, thiserror::Error)]
pub enum OffsetError {
    #[error("invalid offset: {0}")]
    Invalid(String),
}

/// Encode a position as the wire representation (`"0"`, `"5"`, ...).
pub fn encode(offset: u64) -> String {
    offset.to_string()
}

/// Decode a wire offset. Does not accept `-1`; callers resolve that
/// sentinel against the stream's current head before calling this.
pub fn decode(raw: &str) -> Result<u64, OffsetError> {
    raw.parse::<u64>()
        .map_err(|_| OffsetError::Invalid(raw.to_string()))
}

/// Unit an offset advances by on append, distinguished by stream mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Offsets address individual bytes; `head` is the byte length.
    Bytes,
    /// Offsets address whole records; `head` is the record count.
    Records,
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamMode::Bytes => write!(f, "bytes"),
            StreamMode::Records => write!(f, "records"),
        }
    }
}

/// `OffsetGenerator` contract (spec §4.A): given the previous offset and
/// the size of what was just appended, compute the next offset.
pub trait OffsetGenerator {
    fn next_offset(&self, previous_offset: u64, size_delta: u64, mode: StreamMode) -> u64;
}

/// The reference generator: byte-mode advances by the payload length,
/// record-mode advances by exactly one per append regardless of payload size.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicOffsetGenerator;

impl OffsetGenerator for MonotonicOffsetGenerator {
    fn next_offset(&self, previous_offset: u64, size_delta: u64, mode: StreamMode) -> u64 {
        match mode {
            StreamMode::Bytes => previous_offset + size_delta,
            StreamMode::Records => previous_offset + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_conformance_fixtures() {
        assert_eq!(encode(0), "0");
        assert_eq!(encode(5), "5");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode("nope").is_err());
        assert!(decode("-1").is_err());
        assert_eq!(decode("42").unwrap(), 42);
    }

    #[test]
    fn byte_mode_advances_by_payload_length() {
        let gen = MonotonicOffsetGenerator;
        assert_eq!(gen.next_offset(10, 5, StreamMode::Bytes), 15);
    }

    #[test]
    fn record_mode_advances_by_one() {
        let gen = MonotonicOffsetGenerator;
        assert_eq!(gen.next_offset(3, 4096, StreamMode::Records), 4);
    }
}
