//! Reference in-memory `StreamStore` (spec §4.B "Reference in-memory
//! implementation"): per-stream lock, ordered record list, head offset
//! advanced and signalled to the dispatcher on every append.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use crate::{
    dispatcher::Dispatcher,
    offset::{MonotonicOffsetGenerator, OffsetGenerator, StreamMode},
};

use super::{AppendOutcome, CreateOutcome, HeadInfo, ReadOutcome, StoreError, StreamConfig, StreamStore};

#[derive(Clone)]
struct Record {
    start: u64,
    data: Bytes,
    content_type: Option<String>,
}

enum Body {
    Bytes(Vec<u8>),
    Records(Vec<Record>),
}

struct StreamEntry {
    config: StreamConfig,
    body: Body,
    head: u64,
    created_at: chrono::DateTime<Utc>,
}

impl StreamEntry {
    fn mode(&self) -> StreamMode {
        self.config.mode()
    }
}

/// Thread-safe in-memory stream store. Safe to share behind an `Arc`.
pub struct MemoryStreamStore {
    streams: parking_lot::RwLock<HashMap<String, StreamEntry>>,
    dispatcher: Arc<Dispatcher>,
    offsets: MonotonicOffsetGenerator,
}

impl MemoryStreamStore {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            streams: parking_lot::RwLock::new(HashMap::new()),
            dispatcher,
            offsets: MonotonicOffsetGenerator,
        }
    }
}

/// Removes `url` from the map if its TTL has lapsed, so the caller's
/// subsequent lookup observes it as absent. No-op if not expired/missing.
fn evict_if_expired(streams: &mut HashMap<String, StreamEntry>, url: &str) {
    let expired = streams
        .get(url)
        .map(|e| super::is_expired(e.created_at, e.config.ttl, Utc::now()))
        .unwrap_or(false);
    if expired {
        streams.remove(url);
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    fn create(
        &self,
        url: &str,
        config: StreamConfig,
        initial_body: Option<Bytes>,
    ) -> Result<CreateOutcome, StoreError> {
        let mut streams = self.streams.write();
        evict_if_expired(&mut streams, url);
        if streams.contains_key(url) {
            return Err(StoreError::AlreadyExists);
        }

        let mode = config.mode();
        let mut entry = StreamEntry {
            body: match mode {
                StreamMode::Bytes => Body::Bytes(Vec::new()),
                StreamMode::Records => Body::Records(Vec::new()),
            },
            head: 0,
            created_at: Utc::now(),
            config,
        };

        if let Some(bytes) = initial_body {
            if !bytes.is_empty() {
                append_to_entry(&mut entry, &self.offsets, bytes, None)?;
            }
        }

        let next_offset = entry.head;
        streams.insert(url.to_string(), entry);
        drop(streams);
        self.dispatcher.notify(url, next_offset);
        Ok(CreateOutcome { next_offset })
    }

    fn append(
        &self,
        url: &str,
        content_type: Option<&str>,
        item_content_type: Option<&str>,
        bytes: Bytes,
    ) -> Result<AppendOutcome, StoreError> {
        let mut streams = self.streams.write();
        evict_if_expired(&mut streams, url);
        let entry = streams.get_mut(url).ok_or(StoreError::NotFound)?;

        match entry.mode() {
            StreamMode::Bytes => {
                if let Some(ct) = content_type {
                    if normalize(ct) != normalize(&entry.config.content_type) {
                        return Err(StoreError::ContentTypeMismatch {
                            expected: entry.config.content_type.clone(),
                            actual: ct.to_string(),
                        });
                    }
                }
            }
            StreamMode::Records => {
                let expected = entry
                    .config
                    .item_content_type
                    .as_deref()
                    .unwrap_or(&entry.config.content_type);
                if let Some(ct) = item_content_type.or(content_type) {
                    if normalize(ct) != normalize(expected) {
                        return Err(StoreError::ContentTypeMismatch {
                            expected: expected.to_string(),
                            actual: ct.to_string(),
                        });
                    }
                }
            }
        }

        if let Some(max) = entry.config.max_record_size {
            if bytes.len() > max {
                return Err(StoreError::RecordTooLarge);
            }
        }

        let record_content_type = item_content_type.map(|s| s.to_string());
        append_to_entry(entry, &self.offsets, bytes, record_content_type)?;
        let next_offset = entry.head;

        drop(streams);
        self.dispatcher.notify(url, next_offset);
        Ok(AppendOutcome { next_offset })
    }

    fn read(&self, url: &str, from_offset: u64, max_units: u64) -> Result<ReadOutcome, StoreError> {
        let mut streams = self.streams.write();
        evict_if_expired(&mut streams, url);
        let streams = parking_lot::RwLockWriteGuard::downgrade(streams);
        let entry = streams.get(url).ok_or(StoreError::NotFound)?;

        if from_offset > entry.head {
            return Err(StoreError::RangeNotSatisfiable);
        }
        if from_offset == entry.head {
            return Ok(ReadOutcome {
                bytes: Bytes::new(),
                next_offset: from_offset,
                end_of_stream: true,
            });
        }

        match &entry.body {
            Body::Bytes(buf) => {
                let to = from_offset.saturating_add(max_units).min(entry.head);
                let slice = &buf[from_offset as usize..to as usize];
                Ok(ReadOutcome {
                    bytes: Bytes::copy_from_slice(slice),
                    next_offset: to,
                    end_of_stream: to == entry.head,
                })
            }
            Body::Records(records) => {
                let start_idx = from_offset as usize;
                let count = max_units.min(entry.head - from_offset) as usize;
                let mut out = Vec::new();
                for record in &records[start_idx..start_idx + count] {
                    out.extend_from_slice(&record.data);
                }
                let next_offset = from_offset + count as u64;
                Ok(ReadOutcome {
                    bytes: Bytes::from(out),
                    next_offset,
                    end_of_stream: next_offset == entry.head,
                })
            }
        }
    }

    fn head(&self, url: &str) -> Option<HeadInfo> {
        let mut streams = self.streams.write();
        evict_if_expired(&mut streams, url);
        let streams = parking_lot::RwLockWriteGuard::downgrade(streams);
        let entry = streams.get(url)?;
        Some(HeadInfo {
            head_offset: entry.head,
            content_type: entry.config.content_type.clone(),
            item_content_type: entry.config.item_content_type.clone(),
            created_at: entry.created_at,
        })
    }

    fn delete(&self, url: &str) -> bool {
        let removed = self.streams.write().remove(url).is_some();
        if removed {
            self.dispatcher.notify_deleted(url);
            self.dispatcher.forget(url);
        }
        removed
    }

    async fn await_new_data(&self, url: &str, from_offset: u64, timeout: Duration) -> bool {
        // Subscribe while still holding the read lock, so a concurrent
        // `delete()` (which needs the write lock to remove the entry)
        // cannot forget the dispatcher channel between our existence check
        // and our subscription (see `Dispatcher::subscribe`'s doc comment).
        let rx = {
            let streams = self.streams.read();
            if !streams.contains_key(url) {
                return false;
            }
            self.dispatcher.subscribe(url, from_offset)
        };
        self.dispatcher.wait_on(rx, from_offset, timeout).await
    }
}

fn append_to_entry(
    entry: &mut StreamEntry,
    offsets: &MonotonicOffsetGenerator,
    bytes: Bytes,
    item_content_type: Option<String>,
) -> Result<(), StoreError> {
    match &mut entry.body {
        Body::Bytes(buf) => {
            buf.extend_from_slice(&bytes);
            entry.head = offsets.next_offset(entry.head, bytes.len() as u64, StreamMode::Bytes);
        }
        Body::Records(records) => {
            let start = entry.head;
            records.push(Record {
                start,
                data: bytes,
                content_type: item_content_type,
            });
            entry.head = offsets.next_offset(entry.head, 1, StreamMode::Records);
        }
    }
    Ok(())
}

fn normalize(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or(content_type).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStreamStore {
        MemoryStreamStore::new(Arc::new(Dispatcher::new(100)))
    }

    fn cfg(content_type: &str) -> StreamConfig {
        StreamConfig {
            content_type: content_type.to_string(),
            item_content_type: None,
            max_record_size: None,
            ttl: None,
        }
    }

    #[test]
    fn append_then_read_round_trips_bytes() {
        let s = store();
        s.create("/a", cfg("text/plain"), None).unwrap();
        s.append("/a", Some("text/plain"), None, Bytes::from_static(b"hello"))
            .unwrap();
        let r = s.read("/a", 0, u64::MAX).unwrap();
        assert_eq!(&r.bytes[..], b"hello");
        assert_eq!(r.next_offset, 5);
        assert!(r.end_of_stream);
    }

    #[test]
    fn read_at_head_is_empty_not_error() {
        let s = store();
        s.create("/a", cfg("text/plain"), None).unwrap();
        let r = s.read("/a", 0, 10).unwrap();
        assert!(r.bytes.is_empty());
        assert!(r.end_of_stream);
    }

    #[test]
    fn read_past_head_is_range_not_satisfiable() {
        let s = store();
        s.create("/a", cfg("text/plain"), None).unwrap();
        let err = s.read("/a", 5, 10).unwrap_err();
        assert_eq!(err, StoreError::RangeNotSatisfiable);
    }

    #[test]
    fn content_type_mismatch_is_rejected() {
        let s = store();
        s.create("/a", cfg("text/plain"), None).unwrap();
        let err = s
            .append("/a", Some("application/json"), None, Bytes::from_static(b"{}"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ContentTypeMismatch { .. }));
    }

    #[test]
    fn create_twice_conflicts() {
        let s = store();
        s.create("/a", cfg("text/plain"), None).unwrap();
        assert_eq!(s.create("/a", cfg("text/plain"), None).unwrap_err(), StoreError::AlreadyExists);
    }

    #[test]
    fn delete_then_operations_fail_until_recreated() {
        let s = store();
        s.create("/a", cfg("text/plain"), None).unwrap();
        assert!(s.delete("/a"));
        assert!(s.head("/a").is_none());
        assert_eq!(s.read("/a", 0, 10).unwrap_err(), StoreError::NotFound);
        // recreation yields a logically new, empty stream
        s.create("/a", cfg("text/plain"), None).unwrap();
        assert_eq!(s.head("/a").unwrap().head_offset, 0);
    }

    #[test]
    fn record_mode_offsets_count_records_not_bytes() {
        let s = store();
        let mut c = cfg("application/x-ndjson");
        c.item_content_type = Some("application/json".to_string());
        s.create("/a", c, None).unwrap();
        s.append("/a", None, Some("application/json"), Bytes::from_static(b"{\"a\":1}"))
            .unwrap();
        let outcome = s
            .append("/a", None, Some("application/json"), Bytes::from_static(b"{\"b\":22222}"))
            .unwrap();
        assert_eq!(outcome.next_offset, 2);

        let r = s.read("/a", 0, 1).unwrap();
        assert_eq!(&r.bytes[..], b"{\"a\":1}");
        assert_eq!(r.next_offset, 1);
        assert!(!r.end_of_stream);
    }

    #[test]
    fn max_record_size_enforced() {
        let s = store();
        let mut c = cfg("text/plain");
        c.max_record_size = Some(3);
        s.create("/a", c, None).unwrap();
        let err = s.append("/a", Some("text/plain"), None, Bytes::from_static(b"toolong")).unwrap_err();
        assert_eq!(err, StoreError::RecordTooLarge);
    }

    #[tokio::test]
    async fn await_new_data_returns_false_for_missing_stream() {
        let s = store();
        assert!(!s.await_new_data("/missing", 0, Duration::from_millis(10)).await);
    }

    #[test]
    fn read_with_max_length_from_nonzero_offset_does_not_overflow() {
        let s = store();
        s.create("/a", cfg("text/plain"), None).unwrap();
        s.append("/a", Some("text/plain"), None, Bytes::from_static(b"hello")).unwrap();
        let r = s.read("/a", 2, u64::MAX).unwrap();
        assert_eq!(&r.bytes[..], b"llo");
        assert_eq!(r.next_offset, 5);
    }

    #[test]
    fn expired_stream_behaves_absent_and_can_be_recreated() {
        let s = store();
        let mut c = cfg("text/plain");
        c.ttl = Some(Duration::from_millis(1));
        s.create("/a", c, None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(s.head("/a").is_none());
        assert_eq!(s.read("/a", 0, 10).unwrap_err(), StoreError::NotFound);
        s.create("/a", cfg("text/plain"), None).unwrap();
        assert_eq!(s.head("/a").unwrap().head_offset, 0);
    }
}
