//! Fixed-size pool of concurrent call workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::frontier::FrontierEntry;
use crate::worker::{ConversationWorker, TaskResult, WorkerContext};

/// Pool of `size` workers draining one task channel. The channel bound equals
/// the pool size, so at most `size` calls are outstanding and submission
/// backpressures once every worker is busy.
pub struct WorkerPool {
    task_tx: mpsc::Sender<FrontierEntry>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the pool. Completed task results arrive on the returned receiver.
    pub fn spawn(ctx: Arc<WorkerContext>, size: usize) -> (Self, mpsc::Receiver<TaskResult>) {
        let (task_tx, task_rx) = mpsc::channel::<FrontierEntry>(size.max(1));
        let (result_tx, result_rx) = mpsc::channel::<TaskResult>(size.max(1));
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let mut handles = Vec::with_capacity(size);
        for worker_id in 0..size {
            let worker = ConversationWorker::new(ctx.clone());
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                loop {
                    // Hold the receiver lock only while dequeuing; execution
                    // runs unlocked so workers progress independently.
                    let entry = {
                        let mut rx = task_rx.lock().await;
                        tokio::select! {
                            entry = rx.recv() => entry,
                            _ = shutdown_rx.recv() => None,
                        }
                    };
                    let Some(entry) = entry else {
                        tracing::debug!(worker_id, "worker exiting");
                        break;
                    };

                    let result = worker.run(entry, &mut shutdown_rx).await;
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
            }));
        }

        (
            Self {
                task_tx,
                shutdown_tx,
                handles,
            },
            result_rx,
        )
    }

    pub async fn submit(&self, entry: FrontierEntry) -> Result<()> {
        self.task_tx
            .send(entry)
            .await
            .map_err(|_| anyhow!("worker pool is shut down"))
    }

    /// Cancel in-flight tasks and wait up to `grace` for workers to unwind.
    /// Workers still running past the grace window are aborted.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(());
        drop(self.task_tx);

        let deadline = Instant::now() + grace;
        for mut handle in self.handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                tracing::warn!("worker did not stop within grace window; aborting");
                handle.abort();
            }
        }
    }
}
