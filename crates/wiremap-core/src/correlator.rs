//! Matches inbound call-completed events to the worker awaiting each call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use wiremap_schema::CallCompletedEvent;

/// What happened to a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A worker was waiting and has been resumed.
    Matched,
    /// Nobody registered yet; held in the late-arrival buffer.
    Buffered,
}

struct BufferedEvent {
    event: CallCompletedEvent,
    received_at: Instant,
}

#[derive(Default)]
struct CorrelatorInner {
    pending: HashMap<String, oneshot::Sender<CallCompletedEvent>>,
    buffered: HashMap<String, BufferedEvent>,
}

/// In-memory map from `call_id` to a single-use signal. Registration and the
/// provider's event can race: events that arrive first wait in a bounded-time
/// buffer and are handed over at registration.
pub struct WebhookCorrelator {
    inner: Mutex<CorrelatorInner>,
    buffer_ttl: Duration,
}

impl WebhookCorrelator {
    pub fn new(buffer_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CorrelatorInner::default()),
            buffer_ttl,
        }
    }

    /// Register interest in a call. If the event already arrived (and has not
    /// expired) it is delivered immediately on the returned receiver.
    pub async fn register(&self, call_id: &str) -> oneshot::Receiver<CallCompletedEvent> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().await;
        Self::purge_expired(&mut inner, self.buffer_ttl);

        if let Some(buffered) = inner.buffered.remove(call_id) {
            let _ = tx.send(buffered.event);
            return rx;
        }
        inner.pending.insert(call_id.to_string(), tx);
        rx
    }

    /// Deliver an inbound event. Duplicates are idempotent: a later event for
    /// an unmatched call replaces the buffered one (latest wins).
    pub async fn deliver(&self, event: CallCompletedEvent) -> Delivery {
        let mut inner = self.inner.lock().await;
        Self::purge_expired(&mut inner, self.buffer_ttl);

        if let Some(tx) = inner.pending.remove(&event.call_id) {
            let call_id = event.call_id.clone();
            if tx.send(event).is_err() {
                // Receiver already gave up (timeout/cancel); nothing to do.
                tracing::debug!(%call_id, "webhook event arrived after waiter left");
            }
            return Delivery::Matched;
        }

        tracing::debug!(call_id = %event.call_id, "buffering unmatched webhook event");
        inner.buffered.insert(
            event.call_id.clone(),
            BufferedEvent {
                event,
                received_at: Instant::now(),
            },
        );
        Delivery::Buffered
    }

    /// Drop interest in a call (timeout or cancellation unwound the waiter).
    pub async fn unregister(&self, call_id: &str) {
        self.inner.lock().await.pending.remove(call_id);
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    fn purge_expired(inner: &mut CorrelatorInner, ttl: Duration) {
        inner.buffered.retain(|call_id, buffered| {
            let keep = buffered.received_at.elapsed() <= ttl;
            if !keep {
                tracing::warn!(%call_id, "dropping unmatched webhook event past buffer window");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use wiremap_schema::CallStatus;

    use super::*;

    fn event(call_id: &str) -> CallCompletedEvent {
        CallCompletedEvent {
            call_id: call_id.to_string(),
            status: CallStatus::Completed,
            recording_url: Some(format!("https://media.test/{call_id}")),
            duration_s: Some(12.0),
            error: None,
        }
    }

    #[tokio::test]
    async fn register_then_deliver_resumes_waiter() {
        let correlator = WebhookCorrelator::new(Duration::from_secs(60));
        let rx = correlator.register("call-1").await;
        assert_eq!(correlator.deliver(event("call-1")).await, Delivery::Matched);
        let got = rx.await.unwrap();
        assert_eq!(got.call_id, "call-1");
    }

    #[tokio::test]
    async fn early_event_is_buffered_until_registration() {
        let correlator = WebhookCorrelator::new(Duration::from_secs(60));
        assert_eq!(correlator.deliver(event("call-1")).await, Delivery::Buffered);

        let rx = correlator.register("call-1").await;
        let got = rx.await.unwrap();
        assert_eq!(got.call_id, "call-1");
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_events_latest_wins() {
        let correlator = WebhookCorrelator::new(Duration::from_secs(60));
        let mut first = event("call-1");
        first.duration_s = Some(1.0);
        let mut second = event("call-1");
        second.duration_s = Some(2.0);

        correlator.deliver(first).await;
        correlator.deliver(second).await;

        let rx = correlator.register("call-1").await;
        assert_eq!(rx.await.unwrap().duration_s, Some(2.0));
    }

    #[tokio::test]
    async fn expired_buffered_events_are_dropped() {
        let correlator = WebhookCorrelator::new(Duration::from_millis(10));
        correlator.deliver(event("call-1")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Registration after the window starts a fresh wait.
        let mut rx = correlator.register("call-1").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_clears_pending_entry() {
        let correlator = WebhookCorrelator::new(Duration::from_secs(60));
        let _rx = correlator.register("call-1").await;
        correlator.unregister("call-1").await;
        assert_eq!(correlator.pending_count().await, 0);
        assert_eq!(correlator.deliver(event("call-1")).await, Delivery::Buffered);
    }
}
