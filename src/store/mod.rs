//! The Stream Store contract (spec §3, §4.B): durable ordered record log,
//! append atomicity, snapshot reads, and the `await_new_data` primitive
//! that powers live tailing.

pub mod file;
pub mod memory;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::offset::StreamMode;

/// Inclusive lower-bound check used by every backend to apply lazy TTL
/// expiry: a stream whose `expires_at` is at or before `now` is treated as
/// absent by every operation except `create`.
pub fn is_expired(created_at: DateTime<Utc>, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
    match ttl {
        Some(ttl) => match chrono::Duration::from_std(ttl) {
            Ok(d) => now >= created_at + d,
            Err(_) => false,
        },
        None => false,
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("stream not found")]
    NotFound,
    #[error("stream already exists")]
    AlreadyExists,
    #[error("content-type mismatch: expected {expected}, got {actual}")]
    ContentTypeMismatch { expected: String, actual: String },
    #[error("range not satisfiable")]
    RangeNotSatisfiable,
    #[error("record exceeds maximum size")]
    RecordTooLarge,
    #[error("stream is degraded after a partial write failure")]
    Degraded,
    #[error("storage I/O error: {0}")]
    Io(String),
}

/// Configuration supplied at stream creation (spec §3.1 "Stream Config").
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub content_type: String,
    pub item_content_type: Option<String>,
    pub max_record_size: Option<usize>,
    /// Whole-stream expiry (spec.md Non-goals exclude *data* compaction, not
    /// this): once `created_at + ttl` passes, the stream behaves as deleted.
    pub ttl: Option<Duration>,
}

impl StreamConfig {
    pub fn mode(&self) -> StreamMode {
        if self.item_content_type.is_some() {
            StreamMode::Records
        } else {
            StreamMode::Bytes
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub next_offset: u64,
}

#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub next_offset: u64,
}

#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub bytes: Bytes,
    pub next_offset: u64,
    pub end_of_stream: bool,
}

#[derive(Debug, Clone)]
pub struct HeadInfo {
    pub head_offset: u64,
    pub content_type: String,
    pub item_content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A contiguous on-disk byte range a backend can hand a transport adapter
/// directly (spec §4.B, §4.F `FileRegion`), instead of buffering it into an
/// owned `Bytes`.
#[derive(Debug, Clone)]
pub struct FileRegionOutcome {
    pub path: PathBuf,
    pub position: u64,
    pub length: u64,
    pub next_offset: u64,
    pub end_of_stream: bool,
}

/// Operations every storage backend must implement (spec §4.B table).
/// Implementations must serialize concurrent appends to the same stream
/// (per-stream lock, not a single global lock) and must never return a
/// partially-visible append.
#[async_trait]
pub trait StreamStore: Send + Sync {
    fn create(
        &self,
        url: &str,
        config: StreamConfig,
        initial_body: Option<Bytes>,
    ) -> Result<CreateOutcome, StoreError>;

    fn append(
        &self,
        url: &str,
        content_type: Option<&str>,
        item_content_type: Option<&str>,
        bytes: Bytes,
    ) -> Result<AppendOutcome, StoreError>;

    fn read(&self, url: &str, from_offset: u64, max_units: u64) -> Result<ReadOutcome, StoreError>;

    /// Optional zero-copy read path (spec §1 "bounded-memory streaming", §4.B):
    /// a backend that can serve `[from_offset, from_offset + max_units)` as a
    /// contiguous on-disk byte range returns `Ok(Some(..))`; the in-memory
    /// store and any non-trivial range (including the empty catch-up read)
    /// return `Ok(None)` so the caller falls back to `read`.
    fn read_file_region(
        &self,
        url: &str,
        from_offset: u64,
        max_units: u64,
    ) -> Result<Option<FileRegionOutcome>, StoreError> {
        let _ = (url, from_offset, max_units);
        Ok(None)
    }

    fn head(&self, url: &str) -> Option<HeadInfo>;

    /// Returns `true` if the stream was present and is now removed.
    fn delete(&self, url: &str) -> bool;

    /// Block up to `timeout` for the stream's head to advance past
    /// `from_offset`. Returns `true` immediately if it already has.
    /// Returns `false` on timeout or if the stream does not exist.
    async fn await_new_data(&self, url: &str, from_offset: u64, timeout: Duration) -> bool;
}
