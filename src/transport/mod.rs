//! Transport Adapter Contract (spec §4.G): the engine performs no I/O of
//! its own. A host transport supplies a `ServerRequest` (already fully
//! assembled: method, URI, headers, buffered body) to `Engine::handle` and
//! consumes the resulting `ServerResponse`. For an `Sse` body the host
//! must: (1) flush status and headers before the first frame, (2) keep
//! reading frames as fast as the consumer allows (the channel itself
//! supplies the backpressure), (3) flush after every frame, (4) drop the
//! receiver (ending the producer task) on client disconnect.
//!
//! [`axum_adapter`] is the concrete, ambient binding used by the example
//! binary and the integration tests.

pub mod axum_adapter;
