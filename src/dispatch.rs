//! The shared serialized command queue.
//!
//! Every device configured for serialized dispatch feeds the same bounded
//! queue, drained by a single worker in strict arrival order across all of
//! them. Enqueueing into a full queue blocks the sending session's read
//! loop, pausing event intake until a queued command completes.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::runner::{self, CommandInvocation};

/// How many invocations may be pending behind the one the worker is running.
pub const QUEUE_DEPTH: usize = 3;

/// The queue has shut down; no further commands can be enqueued.
#[derive(Debug, Error)]
#[error("serialized command queue closed")]
pub struct QueueClosed;

/// Cloneable enqueue handle for the shared queue.
#[derive(Clone)]
pub struct SerializedDispatcher {
    tx: mpsc::Sender<CommandInvocation>,
}

impl SerializedDispatcher {
    /// Spawn the single worker and hand back the enqueue handle. The worker
    /// drains whatever is still queued after the last handle is dropped,
    /// then exits.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<CommandInvocation>(QUEUE_DEPTH);

        let worker = tokio::spawn(async move {
            while let Some(invocation) = rx.recv().await {
                if let Err(error) = runner::run(&invocation, None).await {
                    warn!("serialized command failed: {error:#}");
                }
            }
            debug!("serialized command queue drained");
        });

        (Self { tx }, worker)
    }

    /// Enqueue an invocation, waiting for a free slot if the queue is full.
    pub async fn dispatch(&self, invocation: CommandInvocation) -> Result<(), QueueClosed> {
        self.tx.send(invocation).await.map_err(|_| QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn shell(script: String) -> CommandInvocation {
        CommandInvocation {
            argv: vec!["sh".into(), "-c".into(), script],
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_commands_run_in_strict_arrival_order() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("order.log");

        let (dispatcher, worker) = SerializedDispatcher::spawn();
        for i in 1..=4 {
            dispatcher
                .dispatch(shell(format!("echo {i} >> {}", out.display())))
                .await
                .unwrap();
        }
        drop(dispatcher);
        worker.await.unwrap();

        let contents = std::fs::read_to_string(&out).unwrap();
        assert_eq!(contents.lines().collect::<Vec<_>>(), ["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_until_a_command_completes() {
        let (dispatcher, _worker) = SerializedDispatcher::spawn();

        // Occupy the worker, then fill every queue slot behind it.
        dispatcher.dispatch(shell("sleep 1".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        for _ in 0..QUEUE_DEPTH {
            dispatcher.dispatch(shell("true".into())).await.unwrap();
        }

        let blocked = timeout(
            Duration::from_millis(200),
            dispatcher.dispatch(shell("true".into())),
        )
        .await;
        assert!(blocked.is_err(), "enqueue into a full queue must block");

        // Once the worker finishes the sleep, a slot frees up and the same
        // enqueue goes through.
        let unblocked = timeout(
            Duration::from_secs(5),
            dispatcher.dispatch(shell("true".into())),
        )
        .await;
        assert!(unblocked.is_ok_and(|sent| sent.is_ok()));
    }

    #[tokio::test]
    async fn test_dispatch_after_worker_shutdown_reports_closed() {
        let (dispatcher, worker) = SerializedDispatcher::spawn();
        worker.abort();
        let _ = worker.await;

        let result = dispatcher.dispatch(shell("true".into())).await;
        assert!(result.is_err());
    }
}
