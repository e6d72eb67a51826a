//! Stream Codec Registry (spec §4.H): content-type-indexed framing for
//! record-oriented streams. In record mode a `StreamCodec` frames one
//! record per append and deframes on read; `length` on a record-mode read
//! means record count, not bytes, which the store already enforces — the
//! codec only concerns itself with turning records into a response body.

use bytes::Bytes;

/// Frames/deframes the record boundary for one content type.
pub trait StreamCodec: Send + Sync {
    /// Wrap a single record's bytes for storage (most codecs are identity
    /// here; JSON-lines appends a trailing newline).
    fn frame(&self, record: &[u8]) -> Bytes;
}

/// Default codec for unknown content types: records pass through unframed
/// and are concatenated verbatim.
pub struct PassThroughCodec;

impl StreamCodec for PassThroughCodec {
    fn frame(&self, record: &[u8]) -> Bytes {
        Bytes::copy_from_slice(record)
    }
}

/// Newline-delimited JSON: one JSON value per record, joined with `\n`.
pub struct JsonLinesCodec;

impl StreamCodec for JsonLinesCodec {
    fn frame(&self, record: &[u8]) -> Bytes {
        let mut out = Vec::with_capacity(record.len() + 1);
        out.extend_from_slice(record);
        out.push(b'\n');
        Bytes::from(out)
    }
}

/// Looks up a `StreamCodec` by content type, falling back to pass-through.
pub struct CodecRegistry {
    json_lines_types: Vec<&'static str>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self {
            json_lines_types: vec!["application/x-ndjson", "application/jsonlines", "application/json"],
        }
    }
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_content_type(&self, content_type: &str) -> Box<dyn StreamCodec> {
        let normalized = content_type.split(';').next().unwrap_or(content_type).trim();
        if self.json_lines_types.iter().any(|t| *t == normalized) {
            Box::new(JsonLinesCodec)
        } else {
            Box::new(PassThroughCodec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_content_type_falls_back_to_pass_through() {
        let registry = CodecRegistry::new();
        let codec = registry.for_content_type("text/plain");
        assert_eq!(codec.frame(b"hello"), Bytes::from_static(b"hello"));
    }

    #[test]
    fn json_lines_codec_appends_newline_per_record() {
        let registry = CodecRegistry::new();
        let codec = registry.for_content_type("application/x-ndjson");
        let framed = codec.frame(br#"{"a":1}"#);
        assert_eq!(&framed[..], b"{\"a\":1}\n");
    }
}
