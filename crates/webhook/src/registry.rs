//! Kind resolution and per-kind validation functions.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use haptic_bus::{EventBus, RequestOptions};
use haptic_events::{Event, EventPayload};

use crate::review::AdmissionRequest;

/// Cluster-supplied mapping from `(group, version, resource)` to the kind
/// string used for handler lookup: `"group/version.Kind"`, or
/// `"version.Kind"` for the core group.
#[derive(Debug, Clone, Default)]
pub struct KindResolver {
    kinds: HashMap<(String, String, String), String>,
}

impl KindResolver {
    /// A resolver covering the resources the controller itself watches.
    pub fn with_defaults() -> Self {
        let mut resolver = Self::default();
        resolver.insert("", "v1", "configmaps", "ConfigMap");
        resolver.insert("", "v1", "secrets", "Secret");
        resolver
    }

    pub fn insert(&mut self, group: &str, version: &str, resource: &str, kind: &str) {
        self.kinds.insert(
            (group.to_owned(), version.to_owned(), resource.to_owned()),
            kind.to_owned(),
        );
    }

    /// The fully-qualified kind for a resource, if known.
    pub fn resolve(&self, group: &str, version: &str, resource: &str) -> Option<String> {
        let kind = self
            .kinds
            .get(&(group.to_owned(), version.to_owned(), resource.to_owned()))?;
        if group.is_empty() {
            Some(format!("{version}.{kind}"))
        } else {
            Some(format!("{group}/{version}.{kind}"))
        }
    }
}

/// Outcome of one admission validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: String,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// A validation function registered for one fully-qualified kind.
#[async_trait]
pub trait AdmissionHandler: Send + Sync {
    async fn review(&self, gvk: &str, request: &AdmissionRequest) -> Verdict;
}

/// Registered handlers plus the default for everything else.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn AdmissionHandler>>,
    allow_unregistered: bool,
}

impl HandlerRegistry {
    pub fn new(allow_unregistered: bool) -> Self {
        Self {
            handlers: HashMap::new(),
            allow_unregistered,
        }
    }

    pub fn register(&mut self, qualified_kind: impl Into<String>, handler: Arc<dyn AdmissionHandler>) {
        self.handlers.insert(qualified_kind.into(), handler);
    }

    pub fn get(&self, qualified_kind: &str) -> Option<Arc<dyn AdmissionHandler>> {
        self.handlers.get(qualified_kind).cloned()
    }

    pub fn allow_unregistered(&self) -> bool {
        self.allow_unregistered
    }
}

/// The standard validation function: synchronous scatter-gather against the
/// same validators the config pipeline uses, AND-aggregated. Any missing
/// responder fails closed.
pub struct ScatterGatherValidation {
    bus: EventBus,
    expected: BTreeSet<String>,
    timeout: Duration,
}

impl ScatterGatherValidation {
    /// Admission must answer well inside the API server's webhook timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new<I, S>(bus: &EventBus, expected: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bus: bus.clone(),
            expected: expected.into_iter().map(Into::into).collect(),
            // The fail-closed valve: never wait longer than five seconds.
            timeout: timeout.min(Duration::from_secs(5)),
        }
    }
}

#[async_trait]
impl AdmissionHandler for ScatterGatherValidation {
    async fn review(&self, gvk: &str, request: &AdmissionRequest) -> Verdict {
        let gvk = gvk.to_owned();
        let namespace = request.namespace.clone();
        let name = request.name.clone();
        let operation = request.operation.clone();
        let object = request.object.clone();
        let outcome = self
            .bus
            .request(
                RequestOptions::new(self.expected.iter().cloned(), self.timeout),
                move |request_id| {
                    Event::new(EventPayload::WebhookValidationRequest {
                        request_id,
                        gvk,
                        namespace,
                        name,
                        operation,
                        object,
                    })
                },
            )
            .await;

        if !outcome.complete {
            tracing::warn!(
                missing = ?outcome.missing,
                "admission validation incomplete, failing closed"
            );
            return Verdict::deny("validation timeout or internal error");
        }

        let mut denials = Vec::new();
        for response in &outcome.responses {
            if let EventPayload::WebhookValidationResponse {
                responder_id,
                allowed,
                reason,
                ..
            } = response.payload()
            {
                if !allowed {
                    denials.push(format!("{responder_id}: {reason}"));
                }
            }
        }
        if denials.is_empty() {
            Verdict::allow()
        } else {
            denials.sort();
            Verdict::deny(denials.join("; "))
        }
    }
}
