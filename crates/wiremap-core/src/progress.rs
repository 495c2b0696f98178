//! Running counters and plateau detection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use wiremap_schema::{FailureKind, StatsSnapshot};

struct ProgressInner {
    calls_attempted: u64,
    calls_succeeded: u64,
    calls_failed: u64,
    failures_by_kind: BTreeMap<String, u64>,
    nodes_added: u64,
    edges_added: u64,
    terminals_marked: u64,
    llm_parse_failures: u64,
    /// New nodes+edges produced by each of the last `window_cap` calls.
    window: VecDeque<u64>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

pub struct ProgressTracker {
    inner: Mutex<ProgressInner>,
    window_cap: usize,
}

impl ProgressTracker {
    pub fn new(window_cap: usize) -> Self {
        Self {
            inner: Mutex::new(ProgressInner {
                calls_attempted: 0,
                calls_succeeded: 0,
                calls_failed: 0,
                failures_by_kind: BTreeMap::new(),
                nodes_added: 0,
                edges_added: 0,
                terminals_marked: 0,
                llm_parse_failures: 0,
                window: VecDeque::with_capacity(window_cap),
                started_at: Utc::now(),
                finished_at: None,
            }),
            window_cap,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressInner> {
        self.inner.lock().expect("progress lock poisoned")
    }

    pub fn call_attempted(&self) {
        self.lock().calls_attempted += 1;
    }

    pub fn call_completed(&self, new_entities: u64) {
        let mut inner = self.lock();
        inner.calls_succeeded += 1;
        push_window(&mut inner.window, self.window_cap, new_entities);
    }

    /// `new_entities` covers anything integrated before the failure, so a
    /// call that found nodes and then failed still counts against plateau.
    pub fn call_failed(&self, kind: &FailureKind, new_entities: u64) {
        let mut inner = self.lock();
        inner.calls_failed += 1;
        *inner
            .failures_by_kind
            .entry(kind.label().to_string())
            .or_insert(0) += 1;
        push_window(&mut inner.window, self.window_cap, new_entities);
    }

    pub fn discovery(&self, new_nodes: u64, new_edges: u64) {
        let mut inner = self.lock();
        inner.nodes_added += new_nodes;
        inner.edges_added += new_edges;
    }

    pub fn terminal_marked(&self) {
        self.lock().terminals_marked += 1;
    }

    pub fn llm_parse_failure(&self) {
        self.lock().llm_parse_failures += 1;
    }

    /// True when the last `window_cap` completed calls produced nothing new.
    pub fn plateaued(&self) -> bool {
        let inner = self.lock();
        inner.window.len() >= self.window_cap && inner.window.iter().all(|&n| n == 0)
    }

    pub fn finish(&self) {
        self.lock().finished_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        let end = inner.finished_at.unwrap_or_else(Utc::now);
        StatsSnapshot {
            calls_attempted: inner.calls_attempted,
            calls_succeeded: inner.calls_succeeded,
            calls_failed: inner.calls_failed,
            failures_by_kind: inner.failures_by_kind.clone(),
            nodes_added: inner.nodes_added,
            edges_added: inner.edges_added,
            terminals_marked: inner.terminals_marked,
            llm_parse_failures: inner.llm_parse_failures,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
            duration_s: (end - inner.started_at).num_milliseconds() as f64 / 1000.0,
        }
    }

    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "calls: {} attempted, {} succeeded, {} failed | graph: {} nodes, {} edges, {} terminals | duration: {:.1}s",
            stats.calls_attempted,
            stats.calls_succeeded,
            stats.calls_failed,
            stats.nodes_added,
            stats.edges_added,
            stats.terminals_marked,
            stats.duration_s,
        )
    }
}

fn push_window(window: &mut VecDeque<u64>, cap: usize, value: u64) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let tracker = ProgressTracker::new(20);
        tracker.call_attempted();
        tracker.call_completed(3);
        tracker.call_attempted();
        tracker.call_failed(&FailureKind::WebhookTimeout, 0);
        tracker.discovery(2, 1);
        tracker.terminal_marked();
        tracker.llm_parse_failure();

        let stats = tracker.snapshot();
        assert_eq!(stats.calls_attempted, 2);
        assert_eq!(stats.calls_succeeded, 1);
        assert_eq!(stats.calls_failed, 1);
        assert_eq!(stats.failures_by_kind.get("webhook_timeout"), Some(&1));
        assert_eq!(stats.nodes_added, 2);
        assert_eq!(stats.edges_added, 1);
        assert_eq!(stats.terminals_marked, 1);
        assert_eq!(stats.llm_parse_failures, 1);
    }

    #[test]
    fn plateau_requires_full_window_of_zeroes() {
        let tracker = ProgressTracker::new(3);
        tracker.call_completed(0);
        tracker.call_completed(0);
        assert!(!tracker.plateaued(), "window not yet full");

        tracker.call_completed(0);
        assert!(tracker.plateaued());
    }

    #[test]
    fn new_discovery_resets_plateau() {
        let tracker = ProgressTracker::new(3);
        for _ in 0..3 {
            tracker.call_completed(0);
        }
        assert!(tracker.plateaued());

        tracker.call_completed(2);
        assert!(!tracker.plateaued());
    }

    #[test]
    fn failed_calls_count_toward_plateau() {
        let tracker = ProgressTracker::new(2);
        tracker.call_failed(&FailureKind::WebhookTimeout, 0);
        tracker.call_failed(&FailureKind::TranscriptionFailed, 0);
        assert!(tracker.plateaued());
    }

    #[test]
    fn summary_mentions_call_and_graph_counts() {
        let tracker = ProgressTracker::new(20);
        tracker.call_attempted();
        tracker.call_completed(1);
        let summary = tracker.summary();
        assert!(summary.contains("1 attempted"));
        assert!(summary.contains("1 succeeded"));
    }
}
