//! Durable append-only HTTP stream service.
//!
//! Each URL path names an ordered, byte-addressable log of records.
//! Clients create streams, append records, read historical ranges, and
//! live-tail new ones via long-polling or Server-Sent Events. The engine
//! is transport- and storage-pluggable: [`engine::Engine`] is the
//! transport-independent protocol state machine, [`store`] is the
//! pluggable durable log, [`dispatcher`] wakes live-tail waiters, and
//! [`transport::axum_adapter`] is the concrete HTTP binding used by the
//! example binary.
//!
//! # Protocol
//!
//! ```text
//! PUT /streams/my-events
//! Content-Type: text/plain
//!
//! Response: 201 Created
//! X-Stream-Next-Offset: 0
//! ```
//!
//! ```text
//! POST /streams/my-events
//! Content-Type: text/plain
//!
//! hello
//!
//! Response: 204 No Content
//! X-Stream-Next-Offset: 5
//! ```
//!
//! ```text
//! GET /streams/my-events?offset=0
//!
//! Response: 200 OK
//! X-Stream-Next-Offset: 5
//!
//! hello
//! ```
//!
//! ```text
//! GET /streams/my-events?live=long-poll&offset=5&timeout=30s
//!
//! (waits up to 30s for new data)
//!
//! Response: 204 No Content
//! X-Stream-Cursor: <opaque>
//! ```
//!
//! ```text
//! GET /streams/my-events?live=sse&offset=0
//! Accept: text/event-stream
//!
//! event: append
//! data: hello
//! id: 5
//! ```

pub mod body;
pub mod cache;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod engine;
pub mod offset;
pub mod path_encoding;
pub mod store;
pub mod transport;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use engine::{Engine, ServerRequest, ServerResponse};
pub use store::{file::FileStreamStore, memory::MemoryStreamStore, StoreError, StreamConfig, StreamStore};
