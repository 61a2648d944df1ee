//! Bookkeeping for the cancellable commands a device session has in flight.
//!
//! One group lives for one attached period. When the device disappears, the
//! session calls [`CancellationGroup::cancel_all`] and then
//! [`CancellationGroup::join_all`], so no command started for a vanished
//! device keeps running unobserved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

type Handles = Arc<Mutex<HashMap<u64, watch::Sender<bool>>>>;

/// Tracks a set of in-flight cancellable operations.
pub struct CancellationGroup {
    handles: Handles,
    next_id: AtomicU64,
    done_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
}

/// Handed to a registered operation; resolves when the group is cancelled.
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Deregisters the operation when dropped, whether it succeeded, failed, or
/// was cancelled. Holding it is also what [`CancellationGroup::join_all`]
/// waits on.
pub struct CompletionGuard {
    id: u64,
    handles: Handles,
    _done: mpsc::Sender<()>,
}

impl CancelSignal {
    /// Wait until the owning group has been asked to cancel.
    pub async fn cancelled(mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // The sender lives in the group's handle map for as long as this
            // signal's task runs; a closed channel means no cancellation can
            // ever arrive.
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.handles.lock().remove(&self.id);
    }
}

impl CancellationGroup {
    pub fn new() -> Self {
        let (done_tx, done_rx) = mpsc::channel(1);
        Self {
            handles: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            done_tx,
            done_rx,
        }
    }

    /// Register a new cancellable operation. Call this before starting the
    /// operation so teardown can never miss it.
    pub fn register(&self) -> (CancelSignal, CompletionGuard) {
        let (tx, rx) = watch::channel(false);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(id, tx);
        let guard = CompletionGuard {
            id,
            handles: self.handles.clone(),
            _done: self.done_tx.clone(),
        };
        (CancelSignal { rx }, guard)
    }

    /// Signal every registered operation to cancel. Does not wait.
    pub fn cancel_all(&self) {
        for handle in self.handles.lock().values() {
            let _ = handle.send(true);
        }
    }

    /// Wait until every registered operation has completed, i.e. dropped its
    /// [`CompletionGuard`].
    pub async fn join_all(mut self) {
        drop(self.done_tx);
        while self.done_rx.recv().await.is_some() {}
    }
}

impl Default for CancellationGroup {
    fn default() -> Self {
        Self::new()
    }
}
