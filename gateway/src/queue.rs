//! Bounded FIFO queues for records and tasks
//!
//! Thin wrapper over a tokio mpsc channel with a shared receiver so several
//! workers can drain one queue. Two push disciplines exist:
//!
//! - [`PushMode::Guarantee`]: producers await when the queue is full; the
//!   queue itself never drops anything.
//! - [`PushMode::DropIfFull`]: best-effort push for callers that prefer
//!   losing data over blocking.
//!
//! The dispatcher uses guarantee mode everywhere, per the ingestion
//! contract: backpressure propagates to the receivers instead of silently
//! losing records.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Queue discipline when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// Producers await until space frees up; nothing is dropped.
    Guarantee,
    /// Push is attempted once; a full queue drops the item.
    DropIfFull,
}

/// A bounded multi-producer multi-consumer FIFO.
///
/// Cloning shares both ends: clones push into and pop from the same
/// channel. `pop` is cancel-safe, so workers can `select!` between a pop
/// and a shutdown signal without losing items.
pub struct Queue<T> {
    tx: mpsc::Sender<T>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    mode: PushMode,
}

impl<T: Send> Queue<T> {
    /// Create a queue holding up to `capacity` items.
    pub fn new(capacity: usize, mode: PushMode) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            mode,
        }
    }

    /// Push one item according to the queue's [`PushMode`].
    pub async fn push(&self, item: T) {
        match self.mode {
            PushMode::Guarantee => {
                if self.tx.send(item).await.is_err() {
                    // Receiver side dropped; only reachable during teardown.
                    warn!("queue closed, item discarded");
                }
            }
            PushMode::DropIfFull => {
                let _ = self.tx.try_send(item);
            }
        }
    }

    /// Pop the next item, awaiting until one is available. Returns `None`
    /// only when every sender has been dropped and the queue is empty.
    pub async fn pop(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
            mode: self.mode,
        }
    }
}
