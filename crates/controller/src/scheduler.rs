//! Deployment scheduler: collapses triggers into rate-limited deployments.
//!
//! The scheduler absorbs arbitrarily high rates of validation, pod and
//! drift triggers and emits at most one in-flight deployment plus one
//! queued follow-up (latest wins). Two locks guard its state: the *state
//! lock* for the rendered/validated/endpoint caches and the *scheduler
//! lock* for the in-progress flag, pending slot and last end time. They are
//! never held together: handlers read the state lock, release it, then take
//! the scheduler lock.
//!
//! The rate-limit sleep runs in a spawned dispatch task so event intake
//! never blocks. The dispatch task publishes exactly one
//! `deployment.scheduled` and leaves the in-progress flag set; the
//! `deployment.completed` handler stamps the end time and drains the
//! pending slot, which is what keeps a single deployment in flight even
//! when the deployer takes longer than the minimum interval.

use std::sync::Arc;
use std::time::Duration;

use haptic_bus::{CONTROL_BUFFER, EventBus, Subscription};
use haptic_events::{Event, EventPayload, ScheduleReason};
use haptic_primitives::{Endpoint, RenderedOutput};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Rendered/validated caches, guarded by the state lock.
#[derive(Default)]
struct CacheState {
    last_rendered: Option<Arc<RenderedOutput>>,
    last_validated: Option<Arc<RenderedOutput>>,
    has_valid_config: bool,
    current_endpoints: Vec<Endpoint>,
    runtime_config_name: String,
    runtime_config_namespace: String,
}

/// Dispatch state, guarded by the scheduler lock.
#[derive(Default)]
struct SchedState {
    deployment_in_progress: bool,
    pending: Option<DeployRequest>,
    last_deployment_end: Option<Instant>,
}

#[derive(Clone)]
struct DeployRequest {
    output: Arc<RenderedOutput>,
    endpoints: Vec<Endpoint>,
    runtime_config_name: String,
    runtime_config_namespace: String,
    reason: ScheduleReason,
}

struct Inner {
    bus: EventBus,
    min_interval: Duration,
    state: Mutex<CacheState>,
    sched: Mutex<SchedState>,
}

/// The deployment scheduler component.
pub struct DeploymentScheduler {
    inner: Arc<Inner>,
    sub: Subscription,
}

/// Read-only view of scheduler state, for introspection and tests.
#[derive(Clone)]
pub struct SchedulerView {
    inner: Arc<Inner>,
}

impl SchedulerView {
    pub fn deployment_in_progress(&self) -> bool {
        self.inner.sched.lock().deployment_in_progress
    }

    pub fn has_pending(&self) -> bool {
        self.inner.sched.lock().pending.is_some()
    }

    pub fn has_valid_config(&self) -> bool {
        self.inner.state.lock().has_valid_config
    }
}

impl DeploymentScheduler {
    pub fn new(bus: &EventBus, min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus: bus.clone(),
                min_interval,
                state: Mutex::new(CacheState::default()),
                sched: Mutex::new(SchedState::default()),
            }),
            sub: bus.subscribe("deployment-scheduler", CONTROL_BUFFER),
        }
    }

    pub fn view(&self) -> SchedulerView {
        SchedulerView {
            inner: Arc::clone(&self.inner),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.sub.recv() => {
                    let Some(event) = event else { break };
                    self.inner.handle(event.payload(), &cancel);
                }
            }
        }
        tracing::debug!("deployment scheduler stopped");
    }
}

impl Inner {
    fn handle(self: &Arc<Self>, payload: &EventPayload, cancel: &CancellationToken) {
        match payload {
            EventPayload::TemplateRendered { output, .. } => {
                self.state.lock().last_rendered = Some(output.clone());
            }
            EventPayload::ValidationCompleted { .. } => self.on_validation_completed(cancel),
            EventPayload::PodsDiscovered { endpoints } => {
                self.on_pods_discovered(endpoints.clone(), cancel);
            }
            EventPayload::DriftPreventionTriggered { .. } => {
                self.on_trigger(ScheduleReason::DriftPrevention, cancel);
            }
            EventPayload::DeploymentCompleted { .. } => self.on_deployment_completed(cancel),
            EventPayload::ConfigPublished { name, namespace } => {
                let mut state = self.state.lock();
                state.runtime_config_name = name.clone();
                state.runtime_config_namespace = namespace.clone();
            }
            EventPayload::LostLeadership { .. } => self.on_lost_leadership(),
            _ => {}
        }
    }

    /// Promotes the cached render into the deployable slot and schedules.
    fn on_validation_completed(self: &Arc<Self>, cancel: &CancellationToken) {
        let request = {
            let mut state = self.state.lock();
            let Some(rendered) = state.last_rendered.clone() else {
                tracing::warn!("validation completed without a cached render");
                return;
            };
            state.last_validated = Some(rendered);
            state.has_valid_config = true;
            if state.current_endpoints.is_empty() {
                tracing::debug!("config validated but no endpoints known yet");
                return;
            }
            build_request(&state, ScheduleReason::ConfigValidation)
        };
        if let Some(request) = request {
            self.schedule(request, cancel);
        }
    }

    fn on_pods_discovered(self: &Arc<Self>, endpoints: Vec<Endpoint>, cancel: &CancellationToken) {
        let request = {
            let mut state = self.state.lock();
            state.current_endpoints = endpoints;
            if !state.has_valid_config || state.current_endpoints.is_empty() {
                return;
            }
            build_request(&state, ScheduleReason::PodDiscovery)
        };
        if let Some(request) = request {
            self.schedule(request, cancel);
        }
    }

    fn on_trigger(self: &Arc<Self>, reason: ScheduleReason, cancel: &CancellationToken) {
        let request = {
            let state = self.state.lock();
            if !state.has_valid_config || state.current_endpoints.is_empty() {
                return;
            }
            build_request(&state, reason)
        };
        if let Some(request) = request {
            self.schedule(request, cancel);
        }
    }

    fn on_deployment_completed(self: &Arc<Self>, cancel: &CancellationToken) {
        let mut sched = self.sched.lock();
        sched.last_deployment_end = Some(Instant::now());
        if let Some(pending) = sched.pending.take() {
            // Stay in the scheduling state and drain the queued latest request.
            drop(sched);
            self.spawn_dispatch(pending, cancel.clone());
        } else {
            sched.deployment_in_progress = false;
        }
    }

    /// Leadership is gone: abandon in-flight bookkeeping but keep the last
    /// end time so a bouncing leader still honors the rate limit.
    fn on_lost_leadership(&self) {
        let mut sched = self.sched.lock();
        if sched.deployment_in_progress || sched.pending.is_some() {
            tracing::info!("lost leadership, abandoning in-flight deployment state");
        }
        sched.deployment_in_progress = false;
        sched.pending = None;
    }

    /// Single-flight entry: either claim the in-progress slot and dispatch,
    /// or overwrite the pending slot (latest wins).
    fn schedule(self: &Arc<Self>, request: DeployRequest, cancel: &CancellationToken) {
        let mut sched = self.sched.lock();
        if sched.deployment_in_progress {
            tracing::debug!(reason = %request.reason, "deployment in flight, replacing pending");
            metrics::counter!("haptic_scheduler_collapsed_total").increment(1);
            sched.pending = Some(request);
            return;
        }
        sched.deployment_in_progress = true;
        drop(sched);
        self.spawn_dispatch(request, cancel.clone());
    }

    fn spawn_dispatch(self: &Arc<Self>, request: DeployRequest, cancel: CancellationToken) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.dispatch(request, cancel).await });
    }

    /// Honors the minimum interval, then publishes the deployment. Runs off
    /// the event loop so intake keeps collapsing new triggers meanwhile.
    async fn dispatch(self: Arc<Self>, request: DeployRequest, cancel: CancellationToken) {
        let wait = {
            let sched = self.sched.lock();
            sched
                .last_deployment_end
                .map(|end| (end + self.min_interval).saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limiting deployment");
            tokio::select! {
                () = cancel.cancelled() => {
                    self.sched.lock().deployment_in_progress = false;
                    tracing::debug!("dispatch cancelled during rate-limit sleep");
                    return;
                }
                () = tokio::time::sleep(wait) => {}
            }
        }
        if cancel.is_cancelled() {
            self.sched.lock().deployment_in_progress = false;
            return;
        }

        metrics::counter!("haptic_scheduler_scheduled_total", "reason" => request.reason.as_str())
            .increment(1);
        tracing::info!(
            reason = %request.reason,
            endpoints = request.endpoints.len(),
            "deployment scheduled"
        );
        self.bus.publish(Event::new(EventPayload::DeploymentScheduled {
            output: request.output,
            endpoints: request.endpoints,
            runtime_config_name: request.runtime_config_name,
            runtime_config_namespace: request.runtime_config_namespace,
            reason: request.reason,
        }));
        // deployment_in_progress stays set until deployment.completed.
    }
}

fn build_request(state: &CacheState, reason: ScheduleReason) -> Option<DeployRequest> {
    let output = state.last_validated.clone()?;
    Some(DeployRequest {
        output,
        endpoints: state.current_endpoints.clone(),
        runtime_config_name: state.runtime_config_name.clone(),
        runtime_config_namespace: state.runtime_config_namespace.clone(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(tag: &str) -> Arc<RenderedOutput> {
        Arc::new(RenderedOutput {
            main: tag.to_owned(),
            aux: Default::default(),
        })
    }

    fn endpoints() -> Vec<Endpoint> {
        vec![Endpoint::new("haproxy-0", "ingress", "http://10.0.0.1:5555")]
    }

    fn rendered(tag: &str) -> Event {
        Event::new(EventPayload::TemplateRendered {
            output: output(tag),
            duration: Duration::from_millis(1),
        })
    }

    fn validation_completed() -> Event {
        Event::new(EventPayload::ValidationCompleted {
            endpoints: Vec::new(),
            warnings: Vec::new(),
            duration: Duration::from_millis(1),
        })
    }

    fn pods(endpoints: Vec<Endpoint>) -> Event {
        Event::new(EventPayload::PodsDiscovered { endpoints })
    }

    fn completed() -> Event {
        Event::new(EventPayload::DeploymentCompleted {
            total: 1,
            succeeded: 1,
            failed: 0,
            duration: Duration::from_millis(5),
        })
    }

    struct Harness {
        bus: EventBus,
        view: SchedulerView,
        watcher: Subscription,
        cancel: CancellationToken,
    }

    fn harness(min_interval: Duration) -> Harness {
        let bus = EventBus::new();
        let scheduler = DeploymentScheduler::new(&bus, min_interval);
        let view = scheduler.view();
        let watcher = bus.subscribe("test", 100);
        bus.start();
        let cancel = CancellationToken::new();
        tokio::spawn(scheduler.run(cancel.clone()));
        Harness {
            bus,
            view,
            watcher,
            cancel,
        }
    }

    /// Lets the scheduler loop and any dispatch tasks run to quiescence.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    fn drain_scheduled(watcher: &mut Subscription) -> Vec<Arc<Event>> {
        let mut scheduled = Vec::new();
        while let Some(event) = watcher.try_recv() {
            if event.type_tag() == "deployment.scheduled" {
                scheduled.push(event);
            }
        }
        scheduled
    }

    fn scheduled_main(event: &Event) -> String {
        match event.payload() {
            EventPayload::DeploymentScheduled { output, .. } => output.main.clone(),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    fn scheduled_reason(event: &Event) -> ScheduleReason {
        match event.payload() {
            EventPayload::DeploymentScheduled { reason, .. } => *reason,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_pod_discoveries_collapses_to_one_publish() {
        let mut h = harness(Duration::from_millis(50));

        // Valid config without endpoints: promotes the render, no schedule.
        h.bus.publish(rendered("c0"));
        h.bus.publish(validation_completed());
        settle().await;
        assert!(h.view.has_valid_config());

        for _ in 0..10 {
            h.bus.publish(pods(endpoints()));
        }
        settle().await;

        let scheduled = drain_scheduled(&mut h.watcher);
        assert_eq!(scheduled.len(), 1, "burst must collapse to one publish");
        assert_eq!(scheduled_reason(&scheduled[0]), ScheduleReason::PodDiscovery);
        match scheduled[0].payload() {
            EventPayload::DeploymentScheduled { endpoints: eps, .. } => {
                assert_eq!(eps, &endpoints());
            }
            other => panic!("unexpected payload {other:?}"),
        }
        // No completion arrived, so the flag stays up.
        assert!(h.view.deployment_in_progress());
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn latest_request_wins_while_in_flight() {
        let mut h = harness(Duration::from_millis(50));
        h.bus.publish(pods(endpoints()));
        h.bus.publish(rendered("c0"));
        h.bus.publish(validation_completed());
        settle().await;
        assert_eq!(drain_scheduled(&mut h.watcher).len(), 1);
        assert!(h.view.deployment_in_progress());

        // Two more validated renders while the deployer is busy.
        h.bus.publish(rendered("c1"));
        h.bus.publish(validation_completed());
        h.bus.publish(rendered("c2"));
        h.bus.publish(validation_completed());
        settle().await;
        assert!(drain_scheduled(&mut h.watcher).is_empty());
        assert!(h.view.has_pending());

        h.bus.publish(completed());
        settle().await;

        let scheduled = drain_scheduled(&mut h.watcher);
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled_main(&scheduled[0]), "c2", "latest request wins");
        // The follow-up deployment is now the in-flight one.
        assert!(h.view.deployment_in_progress());
        assert!(!h.view.has_pending());
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn min_interval_holds_between_publishes() {
        let mut h = harness(Duration::from_secs(1));
        h.bus.publish(pods(endpoints()));
        h.bus.publish(rendered("c0"));
        h.bus.publish(validation_completed());
        settle().await;
        assert_eq!(drain_scheduled(&mut h.watcher).len(), 1);

        // The end time is stamped when this completion is processed.
        h.bus.publish(completed());
        let completed_at = Instant::now();
        settle().await;

        // A trigger right after completion must wait out the interval.
        h.bus.publish(validation_completed());
        loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if !drain_scheduled(&mut h.watcher).is_empty() {
                break;
            }
        }
        let elapsed = completed_at.elapsed();
        assert!(
            elapsed >= Duration::from_millis(995),
            "published after {elapsed:?}, expected >= min interval"
        );
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn lost_leadership_discards_pending_and_in_progress() {
        let mut h = harness(Duration::from_millis(50));
        h.bus.publish(pods(endpoints()));
        h.bus.publish(rendered("c0"));
        h.bus.publish(validation_completed());
        settle().await;
        drain_scheduled(&mut h.watcher);
        h.bus.publish(rendered("c1"));
        h.bus.publish(validation_completed());
        settle().await;
        assert!(h.view.deployment_in_progress());
        assert!(h.view.has_pending());

        h.bus.publish(Event::new(EventPayload::LostLeadership {
            identity: "replica-a".into(),
            reason: "lease transition".into(),
        }));
        settle().await;
        assert!(!h.view.deployment_in_progress());
        assert!(!h.view.has_pending());

        // A straggling completion must not revive the pending deployment.
        h.bus.publish(completed());
        settle().await;
        assert!(drain_scheduled(&mut h.watcher).is_empty());
        assert!(!h.view.deployment_in_progress());
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_sleep_publishes_nothing() {
        let mut h = harness(Duration::from_secs(60));
        h.bus.publish(pods(endpoints()));
        h.bus.publish(rendered("c0"));
        h.bus.publish(validation_completed());
        settle().await;
        drain_scheduled(&mut h.watcher);
        h.bus.publish(completed());
        settle().await;

        // This dispatch sits in a long rate-limit sleep.
        h.bus.publish(validation_completed());
        settle().await;
        assert!(h.view.deployment_in_progress());

        h.cancel.cancel();
        settle().await;
        assert!(drain_scheduled(&mut h.watcher).is_empty());
        assert!(!h.view.deployment_in_progress(), "cancelled dispatch clears the flag");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_endpoints_never_schedules() {
        let mut h = harness(Duration::from_millis(50));
        h.bus.publish(rendered("c0"));
        h.bus.publish(validation_completed());
        h.bus.publish(pods(Vec::new()));
        h.bus.publish(Event::new(EventPayload::DriftPreventionTriggered {
            time_since_last_deployment: Duration::from_secs(10),
        }));
        settle().await;
        assert!(drain_scheduled(&mut h.watcher).is_empty());
        assert!(!h.view.deployment_in_progress());
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_pod_discovery_is_idempotent_under_single_flight() {
        let mut h = harness(Duration::from_millis(50));
        h.bus.publish(rendered("c0"));
        h.bus.publish(validation_completed());
        settle().await;

        let event = pods(endpoints());
        h.bus.publish(event.clone());
        h.bus.publish(event);
        settle().await;
        assert_eq!(drain_scheduled(&mut h.watcher).len(), 1);

        // Draining the collapsed duplicate after completion yields at most
        // one more publish.
        h.bus.publish(completed());
        settle().await;
        assert!(drain_scheduled(&mut h.watcher).len() <= 1);
        h.cancel.cancel();
    }
}
