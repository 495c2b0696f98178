//! Top-level exploration loop: frontier scheduling, retries, termination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;
use wiremap_schema::{GraphSnapshot, StatsSnapshot};

use crate::frontier::FrontierEntry;
use crate::pool::WorkerPool;
use crate::worker::{TaskOutcome, TaskResult, WorkerContext};

const TICK: Duration = Duration::from_millis(100);

/// Capped exponential backoff before a failed task re-enters the frontier.
const RETRY_BACKOFF_MS: &[u64] = &[1_000, 2_000, 4_000, 8_000];

fn retry_backoff(attempts: u32) -> Duration {
    let idx = (attempts.saturating_sub(1) as usize).min(RETRY_BACKOFF_MS.len() - 1);
    Duration::from_millis(RETRY_BACKOFF_MS[idx])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Frontier drained with nothing in flight and no retries pending.
    Exhausted,
    CallBudget,
    WallClock,
    Plateau,
    /// External stop signal.
    Stopped,
}

#[derive(Debug)]
pub struct ExplorationReport {
    pub stop_reason: StopReason,
    pub stats: StatsSnapshot,
    pub graph: GraphSnapshot,
}

/// Clonable handle that ends the run from outside (signal handlers, tests).
#[derive(Clone)]
pub struct StopHandle {
    tx: broadcast::Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(());
    }
}

pub struct ConversationExplorer {
    ctx: Arc<WorkerContext>,
    stop_tx: broadcast::Sender<()>,
}

impl ConversationExplorer {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self { ctx, stop_tx }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Run until quiescent: frontier drained, call budget spent, wall clock
    /// exceeded, coverage plateaued, or stopped externally.
    pub async fn explore(self) -> Result<ExplorationReport> {
        let ctx = self.ctx.clone();
        let config = ctx.config.clone();
        let mut stop_rx = self.stop_tx.subscribe();

        // The synthetic seed places a cold call that establishes the root.
        ctx.frontier.push(FrontierEntry::seed());

        let (pool, mut result_rx) = WorkerPool::spawn(ctx.clone(), config.worker_count);
        let deadline = Instant::now() + config.max_wall_time;
        let pending_retries = Arc::new(AtomicUsize::new(0));
        let mut in_flight = 0usize;
        let mut dispatched = 0u64;

        let stop_reason = loop {
            if Instant::now() >= deadline {
                break StopReason::WallClock;
            }
            if ctx.progress.plateaued() {
                break StopReason::Plateau;
            }

            while in_flight < config.worker_count && dispatched < config.max_calls {
                let Some(entry) = ctx.frontier.pop() else { break };
                // The node may have been classified terminal after this
                // candidate was enqueued; never expand past a terminal.
                if let Some(node_id) = entry.node_id {
                    let terminal = ctx
                        .graph
                        .node(node_id)
                        .await
                        .is_some_and(|n| n.is_terminal());
                    if terminal {
                        tracing::debug!(node_id, "dropping entry for terminal node");
                        continue;
                    }
                }
                ctx.progress.call_attempted();
                dispatched += 1;
                in_flight += 1;
                pool.submit(entry).await?;
            }

            if in_flight == 0 {
                if dispatched >= config.max_calls {
                    break StopReason::CallBudget;
                }
                if ctx.frontier.is_empty() && pending_retries.load(Ordering::SeqCst) == 0 {
                    break StopReason::Exhausted;
                }
            }

            tokio::select! {
                result = result_rx.recv() => {
                    let Some(result) = result else { break StopReason::Stopped };
                    in_flight -= 1;
                    self.handle_result(result, &pending_retries).await;
                }
                _ = tokio::time::sleep(TICK) => {}
                _ = stop_rx.recv() => break StopReason::Stopped,
            }
        };

        tracing::info!(?stop_reason, "exploration quiescent, shutting down pool");
        pool.shutdown(config.grace_shutdown).await;
        ctx.progress.finish();
        tracing::info!("{}", ctx.progress.summary());

        Ok(ExplorationReport {
            stop_reason,
            stats: ctx.progress.snapshot(),
            graph: ctx.graph.snapshot().await,
        })
    }

    async fn handle_result(&self, result: TaskResult, pending_retries: &Arc<AtomicUsize>) {
        let TaskOutcome::Failed { ref kind, .. } = result.outcome else {
            return;
        };
        let kind = kind.clone();
        let entry = result.entry;

        let limit = kind.retry_limit(self.ctx.config.task_retry_max);
        if kind.retryable() && entry.attempts < limit {
            let next = entry.retried();
            let backoff = retry_backoff(next.attempts);
            tracing::info!(
                kind = kind.label(),
                attempts = next.attempts,
                backoff_ms = backoff.as_millis() as u64,
                "re-enqueueing failed task"
            );
            pending_retries.fetch_add(1, Ordering::SeqCst);
            let frontier = self.ctx.frontier.clone();
            let pending = pending_retries.clone();
            tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                frontier.push(next);
                pending.fetch_sub(1, Ordering::SeqCst);
            });
            return;
        }

        tracing::warn!(
            kind = kind.label(),
            attempts = entry.attempts,
            "dropping failed task"
        );
        if let Some(node_id) = entry.node_id {
            self.ctx
                .graph
                .record_error_marker(node_id, &entry.user_response, kind.label())
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_escalates_and_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1_000));
        assert_eq!(retry_backoff(2), Duration::from_millis(2_000));
        assert_eq!(retry_backoff(4), Duration::from_millis(8_000));
        assert_eq!(retry_backoff(40), Duration::from_millis(8_000));
    }
}
