//! Event-stream projection backing the introspection variables.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use haptic_bus::{EventBus, FIREHOSE_BUFFER, Subscription};
use haptic_events::{Event, EventPayload, EventSummary, RingBuffer};
use haptic_primitives::{ControllerConfig, Credentials, RenderedOutput};
use jiff::Timestamp;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::vars::{VarError, VarRegistry};

/// How many recent event summaries the `events` variable retains.
pub const DEFAULT_EVENT_HISTORY: usize = 256;

#[derive(Default)]
struct Projection {
    config: Option<(Arc<ControllerConfig>, String, Timestamp)>,
    credentials: Option<Credentials>,
    rendered: Option<(Arc<RenderedOutput>, Timestamp)>,
    index_seen: bool,
    resource_counts: BTreeMap<String, u64>,
    resource_changes: BTreeMap<String, [u64; 3]>,
    is_leader: Option<bool>,
    observed_leader: Option<String>,
    deployment_in_progress: bool,
    last_deployment: Option<Value>,
    last_validated_version: Option<String>,
    last_invalid_version: Option<String>,
}

struct Shared {
    state: RwLock<Projection>,
    events: Mutex<RingBuffer<EventSummary>>,
    started_at: Timestamp,
    started_instant: Instant,
}

/// Mirrors the event stream into a last-write-wins projection and serves it
/// through registered variables. Readers take the read lock, the run loop
/// is the only writer; the ring buffer sits behind its own mutex.
pub struct StateCache {
    sub: Subscription,
    shared: Arc<Shared>,
}

impl StateCache {
    /// Creates the cache and registers its variables on the registry.
    pub fn new(bus: &EventBus, registry: &VarRegistry, event_history: usize) -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(Projection::default()),
            events: Mutex::new(RingBuffer::new(event_history)),
            started_at: Timestamp::now(),
            started_instant: Instant::now(),
        });
        register_vars(registry, &shared);
        Self {
            // The cache sees everything, including index update bursts.
            sub: bus.subscribe("state-cache", FIREHOSE_BUFFER),
            shared,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.sub.recv() => {
                    let Some(event) = event else { break };
                    self.shared.events.lock().push(event.summary());
                    self.shared.apply(&event);
                }
            }
        }
        tracing::debug!("state cache stopped");
    }
}

impl Shared {
    fn apply(&self, event: &Event) {
        let at = event.timestamp();
        let mut state = self.state.write();
        match event.payload() {
            EventPayload::ConfigValidated { config, version } => {
                state.config = Some((config.clone(), version.clone(), at));
                state.last_validated_version = Some(version.clone());
            }
            EventPayload::ConfigInvalid { version, .. } => {
                state.last_invalid_version = Some(version.clone());
            }
            EventPayload::CredentialsUpdated { credentials, .. } => {
                state.credentials = Some(credentials.clone());
            }
            EventPayload::TemplateRendered { output, .. } => {
                state.rendered = Some((output.clone(), at));
            }
            EventPayload::IndexSynchronized { resource_counts } => {
                state.index_seen = true;
                state.resource_counts = resource_counts.clone();
            }
            EventPayload::ResourceIndexUpdated {
                resource_type,
                change,
            } => {
                state.index_seen = true;
                let totals = state
                    .resource_changes
                    .entry(resource_type.clone())
                    .or_default();
                totals[0] += change.created;
                totals[1] += change.modified;
                totals[2] += change.deleted;
            }
            EventPayload::BecameLeader { identity } => {
                state.is_leader = Some(true);
                state.observed_leader = Some(identity.clone());
            }
            EventPayload::LostLeadership { .. } => {
                state.is_leader = Some(false);
            }
            EventPayload::NewLeaderObserved { identity, .. } => {
                state.observed_leader = Some(identity.clone());
            }
            EventPayload::DeploymentStarted { .. } => {
                state.deployment_in_progress = true;
            }
            EventPayload::DeploymentCompleted {
                total,
                succeeded,
                failed,
                duration,
            } => {
                state.deployment_in_progress = false;
                state.last_deployment = Some(json!({
                    "total": total,
                    "succeeded": succeeded,
                    "failed": failed,
                    "duration_ms": duration.as_millis() as u64,
                    "at": at,
                }));
            }
            _ => {}
        }
    }
}

fn register_vars(registry: &VarRegistry, shared: &Arc<Shared>) {
    let s = Arc::clone(shared);
    registry.register("config", Arc::new(move || {
        let state = s.state.read();
        let (config, version, at) = state.config.as_ref().ok_or(VarError::NotReady)?;
        Ok(json!({"version": version, "updated_at": at, "config": config.as_ref()}))
    }));

    let s = Arc::clone(shared);
    registry.register("credentials", Arc::new(move || {
        let state = s.state.read();
        let credentials = state.credentials.as_ref().ok_or(VarError::NotReady)?;
        serde_json::to_value(credentials).map_err(|_| VarError::NotReady)
    }));

    let s = Arc::clone(shared);
    registry.register("rendered", Arc::new(move || {
        let state = s.state.read();
        let (output, at) = state.rendered.as_ref().ok_or(VarError::NotReady)?;
        Ok(json!({
            "timestamp": at,
            "bytes": output.byte_size(),
            "main": output.main,
        }))
    }));

    let s = Arc::clone(shared);
    registry.register("auxfiles", Arc::new(move || {
        let state = s.state.read();
        let (output, at) = state.rendered.as_ref().ok_or(VarError::NotReady)?;
        Ok(json!({
            "timestamp": at,
            "count": output.aux.file_count(),
            "maps": output.aux.maps,
            "certificates": output.aux.certificates,
            "files": output.aux.files,
        }))
    }));

    let s = Arc::clone(shared);
    registry.register("resources", Arc::new(move || {
        let state = s.state.read();
        if !state.index_seen {
            return Err(VarError::NotReady);
        }
        let changes: serde_json::Map<String, Value> = state
            .resource_changes
            .iter()
            .map(|(name, [created, modified, deleted])| {
                (
                    name.clone(),
                    json!({"created": created, "modified": modified, "deleted": deleted}),
                )
            })
            .collect();
        Ok(json!({"counts": state.resource_counts, "changes": changes}))
    }));

    let s = Arc::clone(shared);
    registry.register("events", Arc::new(move || {
        serde_json::to_value(s.events.lock().snapshot()).map_err(|_| VarError::NotReady)
    }));

    let s = Arc::clone(shared);
    registry.register("state", Arc::new(move || {
        let state = s.state.read();
        Ok(json!({
            "leader": {
                "is_leader": state.is_leader,
                "observed": state.observed_leader,
            },
            "deployment": {
                "in_progress": state.deployment_in_progress,
                "last": state.last_deployment,
            },
            "validation": {
                "last_validated_version": state.last_validated_version,
                "last_invalid_version": state.last_invalid_version,
            },
        }))
    }));

    let s = Arc::clone(shared);
    registry.register("uptime", Arc::new(move || {
        Ok(json!({
            "started_at": s.started_at,
            "uptime_seconds": s.started_instant.elapsed().as_secs(),
        }))
    }));
}
