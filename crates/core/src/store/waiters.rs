//! Per-path waiter registry.
//!
//! A waiter is a one-shot suspension: a reader parked at an offset, resolved
//! exactly once by a notifying append, by stream deletion, or by its own
//! timeout. The registry is owned by a single store instance; waiters never
//! survive the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::offset::Offset;
use crate::types::{StreamMessage, WaitResult};

struct Waiter {
    id: u64,
    offset: Offset,
    tx: oneshot::Sender<WaitResult>,
}

/// Handle returned by [`WaiterRegistry::enroll`]; race its receiver against a
/// timer via [`WaiterRegistry::wait`].
pub(crate) struct WaiterHandle {
    id: u64,
    rx: oneshot::Receiver<WaitResult>,
}

impl WaiterHandle {
    /// Identifier used to unlink this waiter from its path's registry.
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Default)]
pub(crate) struct WaiterRegistry {
    inner: Mutex<HashMap<String, Vec<Waiter>>>,
    next_id: AtomicU64,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a reader at `offset`. The caller must re-check the stream state
    /// after enrolling if it is not inside the path's critical section.
    pub fn enroll(&self, path: &str, offset: Offset) -> WaiterHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(Waiter { id, offset, tx });
        WaiterHandle { id, rx }
    }

    /// Unlink a waiter. Safe to call after it has already been resolved.
    pub fn remove(&self, path: &str, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(waiters) = inner.get_mut(path) {
            waiters.retain(|w| w.id != id);
            if waiters.is_empty() {
                inner.remove(path);
            }
        }
    }

    /// Resolve every waiter satisfied by the stream's new buffer.
    ///
    /// Takes a snapshot of the path's list; waiters whose offset is already
    /// at or past the new length (enrollment raced a stale read) are
    /// re-enrolled instead of resolved.
    pub fn notify_append(&self, path: &str, buffer: &[u8]) {
        let drained = match self.inner.lock().remove(path) {
            Some(waiters) => waiters,
            None => return,
        };
        let now = Utc::now().timestamp_millis();
        let mut keep = Vec::new();
        let mut woken = 0usize;
        for waiter in drained {
            let pos = waiter.offset.pos as usize;
            if pos < buffer.len() {
                let message = StreamMessage {
                    data: buffer[pos..].to_vec(),
                    offset: waiter.offset.to_string(),
                    timestamp: now,
                };
                // A closed receiver is an abandoned waiter; dropping it here
                // is its garbage collection.
                let _ = waiter.tx.send(WaitResult {
                    messages: vec![message],
                    timed_out: false,
                });
                woken += 1;
            } else {
                keep.push(waiter);
            }
        }
        if !keep.is_empty() {
            self.inner
                .lock()
                .entry(path.to_string())
                .or_default()
                .extend(keep);
        }
        if woken > 0 {
            debug!(path = %path, woken, "notified waiters");
        }
    }

    /// Resolve every waiter with an empty, non-timeout result: the stream is
    /// gone and the next call on this path will surface `StreamNotFound`.
    pub fn notify_delete(&self, path: &str) {
        if let Some(waiters) = self.inner.lock().remove(path) {
            for waiter in waiters {
                let _ = waiter.tx.send(WaitResult {
                    messages: Vec::new(),
                    timed_out: false,
                });
            }
        }
    }

    /// Race a parked waiter against its timeout. On timeout the waiter is
    /// unlinked before returning.
    pub async fn wait(&self, path: &str, handle: WaiterHandle, timeout_ms: u64) -> WaitResult {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), handle.rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without resolving: the registry entry vanished,
            // which only happens when the store itself is being torn down.
            Ok(Err(_)) => WaitResult {
                messages: Vec::new(),
                timed_out: false,
            },
            Err(_) => {
                self.remove(path, handle.id);
                WaitResult {
                    messages: Vec::new(),
                    timed_out: true,
                }
            }
        }
    }

    #[cfg(test)]
    pub fn pending(&self, path: &str) -> usize {
        self.inner.lock().get(path).map_or(0, Vec::len)
    }
}
