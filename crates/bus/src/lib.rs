//! In-process publish/subscribe bus connecting the controller components.
//!
//! One bus instance exists per controller iteration and dies with it; there
//! is no global registry. Subscribers own a bounded FIFO buffer sized at
//! subscribe time. Publishing never blocks: a full buffer drops the event
//! for that subscriber only (slow-consumer isolation), other subscribers
//! are unaffected.
//!
//! Lifecycle: events published before [`EventBus::start`] accumulate in a
//! pre-start queue and are replayed in publish order, so components whose
//! initialization order is uncertain subscribe before start and still see
//! everything. After [`EventBus::stop`], publish becomes a no-op and live
//! subscriptions drain their buffers to completion before closing.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use haptic_events::{Event, RequestId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Buffer size for control-plane events (config, deployment lifecycle).
pub const CONTROL_BUFFER: usize = 50;
/// Buffer size for high-frequency events (resource index updates).
pub const FIREHOSE_BUFFER: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Publishes are buffered for replay at start.
    Buffering,
    Running,
    /// Publishes are dropped.
    Stopped,
}

struct SubscriberSlot {
    id: u64,
    name: String,
    tx: mpsc::Sender<Arc<Event>>,
}

struct BusState {
    phase: Phase,
    pre_start: Vec<Arc<Event>>,
    subscribers: Vec<SubscriberSlot>,
}

struct BusInner {
    state: Mutex<BusState>,
    next_subscriber_id: AtomicU64,
    next_request_id: AtomicU64,
}

/// The process-wide event bus. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState {
                    phase: Phase::Buffering,
                    pre_start: Vec::new(),
                    subscribers: Vec::new(),
                }),
                next_subscriber_id: AtomicU64::new(0),
                next_request_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a bounded subscriber. The returned handle owns the drain;
    /// dropping it unregisters the subscriber.
    pub fn subscribe(&self, name: impl Into<String>, capacity: usize) -> Subscription {
        let name = name.into();
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.inner.state.lock().subscribers.push(SubscriberSlot {
            id,
            name: name.clone(),
            tx,
        });
        Subscription {
            name,
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Fans the event out to every current subscriber. Never blocks; a full
    /// subscriber buffer drops the event for that subscriber only.
    pub fn publish(&self, event: Event) {
        let event = Arc::new(event);
        let mut state = self.inner.state.lock();
        match state.phase {
            Phase::Buffering => state.pre_start.push(event),
            Phase::Stopped => {
                tracing::trace!(event = event.type_tag(), "publish after stop dropped");
            }
            Phase::Running => {
                metrics::counter!("haptic_bus_published_total").increment(1);
                fan_out(&state.subscribers, &event);
            }
        }
    }

    /// Starts delivery, replaying any pre-start events in publish order.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Buffering {
            return;
        }
        state.phase = Phase::Running;
        let buffered = std::mem::take(&mut state.pre_start);
        tracing::debug!(buffered = buffered.len(), "event bus started");
        for event in &buffered {
            metrics::counter!("haptic_bus_published_total").increment(1);
            fan_out(&state.subscribers, event);
        }
    }

    /// Stops delivery. Later publishes are no-ops; live subscriptions drain
    /// their remaining buffer and then close.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        state.phase = Phase::Stopped;
        // Dropping the senders closes each channel once its buffer drains.
        state.subscribers.clear();
        state.pre_start.clear();
        tracing::debug!("event bus stopped");
    }

    /// Publishes a request built around a fresh request id, then collects
    /// correlated responses until the expected responder set is satisfied or
    /// the timeout elapses.
    ///
    /// The collecting subscription is registered before the request is
    /// published, so responses cannot be missed. Requires a started bus: a
    /// buffered request would deadlock its own gather.
    pub async fn request(
        &self,
        options: RequestOptions,
        build: impl FnOnce(RequestId) -> Event,
    ) -> RequestOutcome {
        let request_id =
            RequestId::from_raw(self.inner.next_request_id.fetch_add(1, Ordering::Relaxed) + 1);
        let capacity = options.expected.len() * 4 + 16;
        let mut gather = self.subscribe("request-gather", capacity);
        self.publish(build(request_id));

        let deadline = tokio::time::Instant::now() + options.timeout;
        let mut missing = options.expected;
        let mut responses = Vec::new();
        while !missing.is_empty() {
            match tokio::time::timeout_at(deadline, gather.recv()).await {
                Ok(Some(event)) => {
                    let Some(correlation) = event.payload().correlation() else {
                        continue;
                    };
                    if correlation.request_id == request_id
                        && missing.remove(correlation.responder_id)
                    {
                        responses.push(event);
                    }
                }
                // Bus stopped mid-gather or deadline passed.
                Ok(None) | Err(_) => break,
            }
        }

        RequestOutcome {
            request_id,
            complete: missing.is_empty(),
            missing,
            responses,
        }
    }
}

fn fan_out(subscribers: &[SubscriberSlot], event: &Arc<Event>) {
    for slot in subscribers {
        match slot.tx.try_send(Arc::clone(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics::counter!("haptic_bus_dropped_total", "subscriber" => slot.name.clone())
                    .increment(1);
                tracing::warn!(
                    subscriber = %slot.name,
                    event = event.type_tag(),
                    "subscriber buffer full, event dropped"
                );
            }
            // Receiver dropped but not yet unregistered.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Scatter-gather parameters for [`EventBus::request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Responder ids that must answer for the gather to complete.
    pub expected: BTreeSet<String>,
    pub timeout: Duration,
}

impl RequestOptions {
    pub fn new<I, S>(expected: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected: expected.into_iter().map(Into::into).collect(),
            timeout,
        }
    }
}

/// Result of a scatter-gather call.
#[derive(Debug)]
pub struct RequestOutcome {
    pub request_id: RequestId,
    /// Matched responses, in arrival order.
    pub responses: Vec<Arc<Event>>,
    /// Whether every expected responder answered in time.
    pub complete: bool,
    /// Responder ids that never answered.
    pub missing: BTreeSet<String>,
}

/// A subscriber's receive handle.
pub struct Subscription {
    name: String,
    id: u64,
    rx: mpsc::Receiver<Arc<Event>>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next event, FIFO in publish order. `None` once the bus has stopped
    /// and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Non-blocking variant, for tests and opportunistic drains.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.state.lock().subscribers.retain(|slot| slot.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haptic_events::EventPayload;

    fn shutdown_event(reason: &str) -> Event {
        Event::new(EventPayload::ControllerShutdown {
            reason: reason.into(),
        })
    }

    fn reason(event: &Event) -> String {
        match event.payload() {
            EventPayload::ControllerShutdown { reason } => reason.clone(),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivery_is_fifo_per_subscriber() {
        let bus = EventBus::new();
        bus.start();
        let mut sub = bus.subscribe("fifo", 10);
        for i in 0..5 {
            bus.publish(shutdown_event(&i.to_string()));
        }
        for i in 0..5 {
            assert_eq!(reason(&sub.recv().await.unwrap()), i.to_string());
        }
    }

    #[tokio::test]
    async fn pre_start_events_are_replayed_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("early", 10);
        bus.publish(shutdown_event("a"));
        bus.publish(shutdown_event("b"));
        assert!(sub.try_recv().is_none(), "nothing delivered before start");
        bus.start();
        assert_eq!(reason(&sub.recv().await.unwrap()), "a");
        assert_eq!(reason(&sub.recv().await.unwrap()), "b");
    }

    #[tokio::test]
    async fn full_buffer_drops_for_that_subscriber_only() {
        let bus = EventBus::new();
        bus.start();
        let mut slow = bus.subscribe("slow", 1);
        let mut fast = bus.subscribe("fast", 10);
        for i in 0..4 {
            bus.publish(shutdown_event(&i.to_string()));
        }
        // The slow subscriber kept only the first event.
        assert_eq!(reason(&slow.recv().await.unwrap()), "0");
        assert!(slow.try_recv().is_none());
        // The fast subscriber saw everything.
        for i in 0..4 {
            assert_eq!(reason(&fast.recv().await.unwrap()), i.to_string());
        }
    }

    #[tokio::test]
    async fn stop_drains_then_closes() {
        let bus = EventBus::new();
        bus.start();
        let mut sub = bus.subscribe("drain", 10);
        bus.publish(shutdown_event("pending"));
        bus.stop();
        bus.publish(shutdown_event("after-stop"));
        assert_eq!(reason(&sub.recv().await.unwrap()), "pending");
        assert!(sub.recv().await.is_none(), "channel closes after drain");
    }

    #[tokio::test]
    async fn dropped_subscription_unregisters() {
        let bus = EventBus::new();
        bus.start();
        let sub = bus.subscribe("gone", 1);
        drop(sub);
        // Publishing to no subscribers must not panic or leak.
        bus.publish(shutdown_event("x"));
        assert!(bus.inner.state.lock().subscribers.is_empty());
    }

    #[tokio::test]
    async fn request_gathers_expected_responses() {
        let bus = EventBus::new();
        bus.start();

        let responder_bus = bus.clone();
        let mut requests = bus.subscribe("responder", 10);
        tokio::spawn(async move {
            while let Some(event) = requests.recv().await {
                if let Some(request_id) = event.payload().request_id() {
                    for id in ["basic", "dryrun"] {
                        responder_bus.publish(Event::new(EventPayload::WebhookValidationResponse {
                            request_id,
                            responder_id: id.into(),
                            allowed: true,
                            reason: String::new(),
                        }));
                    }
                }
            }
        });

        let outcome = bus
            .request(
                RequestOptions::new(["basic", "dryrun"], Duration::from_secs(1)),
                |request_id| {
                    Event::new(EventPayload::WebhookValidationRequest {
                        request_id,
                        gvk: "v1.ConfigMap".into(),
                        namespace: "default".into(),
                        name: "cfg".into(),
                        operation: "UPDATE".into(),
                        object: serde_json::Value::Null,
                    })
                },
            )
            .await;

        assert!(outcome.complete);
        assert_eq!(outcome.responses.len(), 2);
        assert!(outcome.missing.is_empty());
    }

    #[tokio::test]
    async fn request_times_out_naming_missing_responders() {
        let bus = EventBus::new();
        bus.start();

        let responder_bus = bus.clone();
        let mut requests = bus.subscribe("half-responder", 10);
        tokio::spawn(async move {
            while let Some(event) = requests.recv().await {
                if let Some(request_id) = event.payload().request_id() {
                    responder_bus.publish(Event::new(EventPayload::WebhookValidationResponse {
                        request_id,
                        responder_id: "basic".into(),
                        allowed: true,
                        reason: String::new(),
                    }));
                }
            }
        });

        let outcome = bus
            .request(
                RequestOptions::new(["basic", "dryrun"], Duration::from_millis(100)),
                |request_id| {
                    Event::new(EventPayload::WebhookValidationRequest {
                        request_id,
                        gvk: "v1.ConfigMap".into(),
                        namespace: "default".into(),
                        name: "cfg".into(),
                        operation: "UPDATE".into(),
                        object: serde_json::Value::Null,
                    })
                },
            )
            .await;

        assert!(!outcome.complete);
        assert_eq!(outcome.responses.len(), 1);
        assert_eq!(outcome.missing.iter().collect::<Vec<_>>(), ["dryrun"]);
    }

    #[tokio::test]
    async fn responses_for_other_requests_are_ignored() {
        let bus = EventBus::new();
        bus.start();

        let responder_bus = bus.clone();
        let mut requests = bus.subscribe("confused-responder", 10);
        tokio::spawn(async move {
            while let Some(event) = requests.recv().await {
                if let Some(request_id) = event.payload().request_id() {
                    // A stale response from an unrelated request id.
                    responder_bus.publish(Event::new(EventPayload::WebhookValidationResponse {
                        request_id: RequestId::from_raw(9999),
                        responder_id: "basic".into(),
                        allowed: false,
                        reason: "stale".into(),
                    }));
                    responder_bus.publish(Event::new(EventPayload::WebhookValidationResponse {
                        request_id,
                        responder_id: "basic".into(),
                        allowed: true,
                        reason: String::new(),
                    }));
                }
            }
        });

        let outcome = bus
            .request(
                RequestOptions::new(["basic"], Duration::from_secs(1)),
                |request_id| {
                    Event::new(EventPayload::WebhookValidationRequest {
                        request_id,
                        gvk: "v1.ConfigMap".into(),
                        namespace: "default".into(),
                        name: "cfg".into(),
                        operation: "UPDATE".into(),
                        object: serde_json::Value::Null,
                    })
                },
            )
            .await;

        assert!(outcome.complete);
        assert_eq!(outcome.responses.len(), 1);
        match outcome.responses[0].payload() {
            EventPayload::WebhookValidationResponse { allowed, .. } => assert!(*allowed),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
