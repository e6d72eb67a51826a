//! Live-Tail Dispatcher (spec §4.C): per-stream watcher registry that wakes
//! long-poll waiters and drives SSE producers.
//!
//! Each stream gets its own `tokio::sync::watch` channel carrying the
//! latest head offset plus a deletion marker. `watch` is exactly the
//! primitive spec §9 describes under "per-stream condition variables": a
//! single-slot, lossy channel is inherently coalescing (a subscriber that
//! hasn't polled just sees the latest value next time), which is also the
//! SSE backpressure behaviour spec §4.C requires without extra bookkeeping.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::RwLock;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSignal {
    pub head: u64,
    pub deleted: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("waiter capacity exhausted")]
pub struct WaiterCapExceeded;

/// RAII guard occupying one slot of the dispatcher's waiter cap. Dropping it
/// frees the slot; this makes cancellation (client disconnect) automatically
/// release capacity without explicit bookkeeping at every early-return site.
pub struct WaiterGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Channel {
    tx: watch::Sender<StreamSignal>,
}

pub struct Dispatcher {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    waiter_count: Arc<AtomicUsize>,
    max_waiters: usize,
}

impl Dispatcher {
    pub fn new(max_waiters: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            waiter_count: Arc::new(AtomicUsize::new(0)),
            max_waiters,
        }
    }

    fn channel_for(&self, stream_id: &str, initial_head: u64) -> Arc<Channel> {
        if let Some(c) = self.channels.read().get(stream_id) {
            return c.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(stream_id.to_string())
            .or_insert_with(|| {
                let (tx, _rx) = watch::channel(StreamSignal {
                    head: initial_head,
                    deleted: false,
                });
                Arc::new(Channel { tx })
            })
            .clone()
    }

    /// Reserve one waiter slot. Returns `Err` when the soft cap (spec §5,
    /// default 10,000) is already occupied; the caller maps this to 503.
    pub fn reserve_waiter(&self) -> Result<WaiterGuard, WaiterCapExceeded> {
        let prev = self.waiter_count.fetch_add(1, Ordering::SeqCst);
        if prev >= self.max_waiters {
            self.waiter_count.fetch_sub(1, Ordering::SeqCst);
            return Err(WaiterCapExceeded);
        }
        Ok(WaiterGuard {
            count: self.waiter_count.clone(),
        })
    }

    pub fn waiter_count(&self) -> usize {
        self.waiter_count.load(Ordering::SeqCst)
    }

    /// Called by the store after a successful append.
    pub fn notify(&self, stream_id: &str, new_head: u64) {
        let channel = self.channel_for(stream_id, new_head);
        channel.tx.send_modify(|s| {
            if new_head > s.head {
                s.head = new_head;
            }
        });
    }

    /// Called by the store after a successful delete. All waiters observe a
    /// terminal marker.
    pub fn notify_deleted(&self, stream_id: &str) {
        let channel = self.channel_for(stream_id, 0);
        channel.tx.send_modify(|s| s.deleted = true);
    }

    /// Drop bookkeeping for a stream once nobody can be waiting on it
    /// (called when a stream is deleted and then its id is recreated fresh).
    pub fn forget(&self, stream_id: &str) {
        self.channels.write().remove(stream_id);
    }

    /// The await-new-data primitive driving both long-poll and SSE. A
    /// waiter that calls this *before* a concurrent append completes is
    /// guaranteed to observe it (register-before-check discipline: the
    /// `watch::Receiver` is created and its current value captured before
    /// the caller's own re-check of `from_offset`, so no notification that
    /// happens after subscription can be missed).
    pub async fn await_new_data(&self, stream_id: &str, from_offset: u64, timeout: Duration) -> bool {
        let rx = self.subscribe(stream_id, from_offset);
        self.wait_on(rx, from_offset, timeout).await
    }

    /// A raw subscription handle for the SSE loop, which needs to observe
    /// every intermediate signal rather than just a yes/no liveness answer.
    ///
    /// Callers that also need to check a store-level existence flag (stores'
    /// own `await_new_data`) must call this *before* releasing whatever lock
    /// guards that existence check, then call [`Dispatcher::wait_on`]
    /// separately. Subscribing first and checking existence second closes
    /// the race where a concurrent `delete()` removes the stream and forgets
    /// its channel between an existence check and the subscribe call: since
    /// a fresh `subscribe` after `forget` would silently hand back a
    /// brand-new, non-deleted channel, a waiter could block the full
    /// timeout instead of observing the deletion.
    pub fn subscribe(&self, stream_id: &str, from_offset: u64) -> watch::Receiver<StreamSignal> {
        self.channel_for(stream_id, from_offset).tx.subscribe()
    }

    /// Wait on an already-subscribed receiver for the head to pass
    /// `from_offset`, up to `timeout`. Split out from `await_new_data` so
    /// callers can subscribe while holding a lock that also guards the
    /// existence check, then wait without holding that lock.
    pub async fn wait_on(&self, mut rx: watch::Receiver<StreamSignal>, from_offset: u64, timeout: Duration) -> bool {
        if signal_satisfies(*rx.borrow(), from_offset) {
            return rx.borrow().head > from_offset;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match tokio::time::timeout(remaining, rx.changed()).await {
                Ok(Ok(())) => {
                    let signal = *rx.borrow();
                    if signal.deleted {
                        return false;
                    }
                    if signal.head > from_offset {
                        return true;
                    }
                    // spurious wake-up: loop and re-check against the deadline.
                }
                Ok(Err(_)) => return false, // sender dropped
                Err(_) => return false,     // timed out
            }
        }
    }
}

fn signal_satisfies(signal: StreamSignal, from_offset: u64) -> bool {
    signal.deleted || signal.head > from_offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn wakes_immediately_when_already_ahead() {
        let d = Dispatcher::new(10);
        d.notify("/a", 5);
        let woke = d.await_new_data("/a", 2, StdDuration::from_millis(50)).await;
        assert!(woke);
    }

    #[tokio::test]
    async fn register_before_check_discipline() {
        let d = Arc::new(Dispatcher::new(10));
        let d2 = d.clone();
        let waiter = tokio::spawn(async move { d2.await_new_data("/a", 0, StdDuration::from_secs(5)).await });
        // Give the waiter a chance to subscribe before we append.
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        d.notify("/a", 1);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn times_out_without_data() {
        let d = Dispatcher::new(10);
        let woke = d.await_new_data("/a", 0, StdDuration::from_millis(30)).await;
        assert!(!woke);
    }

    #[tokio::test]
    async fn delete_wakes_waiters_with_false() {
        let d = Arc::new(Dispatcher::new(10));
        let d2 = d.clone();
        let waiter = tokio::spawn(async move { d2.await_new_data("/a", 0, StdDuration::from_secs(5)).await });
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        d.notify_deleted("/a");
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn subscribing_before_delete_observes_deletion_immediately_even_after_forget() {
        // Reproduces the TOCTOU a store's `await_new_data` must avoid:
        // subscribe, *then* delete+forget the channel entirely, and confirm
        // the already-held receiver still reports the deletion rather than
        // blocking for the full timeout.
        let d = Dispatcher::new(10);
        let rx = d.subscribe("/a", 0);
        d.notify_deleted("/a");
        d.forget("/a");
        let woke = d.wait_on(rx, 0, StdDuration::from_secs(5)).await;
        assert!(!woke);
    }

    #[test]
    fn waiter_cap_is_enforced_and_released_on_drop() {
        let d = Dispatcher::new(1);
        let guard = d.reserve_waiter().unwrap();
        assert!(d.reserve_waiter().is_err());
        drop(guard);
        assert!(d.reserve_waiter().is_ok());
    }
}
