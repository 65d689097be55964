use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use haptic_primitives::{ControllerConfig, Credentials, Endpoint, RenderedOutput};
use jiff::Timestamp;
use serde::Serialize;
use serde_json::{Value, json};

/// Correlates a scatter-gather request with its responses. Allocated by the
/// bus, unique per call within an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RequestId(u64);

impl RequestId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Why the scheduler decided to deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleReason {
    ConfigValidation,
    PodDiscovery,
    DriftPrevention,
}

impl ScheduleReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigValidation => "config_validation",
            Self::PodDiscovery => "pod_discovery",
            Self::DriftPrevention => "drift_prevention",
        }
    }
}

impl std::fmt::Display for ScheduleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-resource-type change counters carried by `resource.index.updated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeStats {
    pub created: u64,
    pub modified: u64,
    pub deleted: u64,
    pub is_initial_sync: bool,
}

/// Response-to-request linkage extracted from a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correlation<'a> {
    pub request_id: RequestId,
    pub responder_id: &'a str,
}

/// An immutable record published on the bus.
#[derive(Debug, Clone)]
pub struct Event {
    timestamp: Timestamp,
    payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            timestamp: Timestamp::now(),
            payload,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn type_tag(&self) -> &'static str {
        self.payload.type_tag()
    }

    /// Compact projection for the debug event history and introspection.
    pub fn summary(&self) -> EventSummary {
        EventSummary {
            timestamp: self.timestamp,
            type_tag: self.type_tag(),
            detail: self.payload.summary(),
        }
    }
}

/// What the ring buffer retains per event.
#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub timestamp: Timestamp,
    #[serde(rename = "type")]
    pub type_tag: &'static str,
    pub detail: Value,
}

/// The canonical event set the core publishes or consumes.
#[derive(Debug, Clone)]
pub enum EventPayload {
    ControllerStarted {
        config_version: String,
        secret_version: String,
    },
    ControllerShutdown {
        reason: String,
    },

    ConfigResourceChanged {
        object: Value,
    },
    ConfigParsed {
        config: Arc<ControllerConfig>,
        version: String,
        secret_version: String,
    },
    ConfigValidationRequest {
        request_id: RequestId,
        config: Arc<ControllerConfig>,
        version: String,
    },
    ConfigValidationResponse {
        request_id: RequestId,
        responder_id: String,
        valid: bool,
        errors: Vec<String>,
    },
    ConfigValidated {
        config: Arc<ControllerConfig>,
        version: String,
    },
    ConfigInvalid {
        version: String,
        /// Errors keyed by the responder (or `loader`) that produced them.
        errors: BTreeMap<String, Vec<String>>,
    },
    /// Coordinates of the runtime config object deploy events reference.
    ConfigPublished {
        name: String,
        namespace: String,
    },

    SecretResourceChanged {
        object: Value,
    },
    CredentialsUpdated {
        credentials: Credentials,
        version: String,
    },
    CredentialsInvalid {
        version: String,
        error: String,
    },

    ResourceIndexUpdated {
        resource_type: String,
        change: ChangeStats,
    },
    IndexSynchronized {
        resource_counts: BTreeMap<String, u64>,
    },

    TemplateRendered {
        output: Arc<RenderedOutput>,
        duration: Duration,
    },
    TemplateRenderFailed {
        template_name: String,
        error: String,
    },

    ValidationStarted {
        endpoints: Vec<Endpoint>,
    },
    ValidationCompleted {
        endpoints: Vec<Endpoint>,
        warnings: Vec<String>,
        duration: Duration,
    },
    ValidationFailed {
        endpoints: Vec<Endpoint>,
        errors: Vec<String>,
        duration: Duration,
    },

    PodsDiscovered {
        endpoints: Vec<Endpoint>,
    },

    DeploymentScheduled {
        output: Arc<RenderedOutput>,
        endpoints: Vec<Endpoint>,
        runtime_config_name: String,
        runtime_config_namespace: String,
        reason: ScheduleReason,
    },
    DeploymentStarted {
        endpoints: Vec<Endpoint>,
    },
    InstanceDeployed {
        endpoint: Endpoint,
        duration: Duration,
        reload_required: bool,
    },
    InstanceDeploymentFailed {
        endpoint: Endpoint,
        error: String,
        retryable: bool,
    },
    DeploymentCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        duration: Duration,
    },

    DriftPreventionTriggered {
        time_since_last_deployment: Duration,
    },

    LeaderElectionStarted {
        identity: String,
        lease_name: String,
        lease_namespace: String,
    },
    BecameLeader {
        identity: String,
    },
    LostLeadership {
        identity: String,
        reason: String,
    },
    NewLeaderObserved {
        identity: String,
        is_self: bool,
    },

    WebhookValidationRequest {
        request_id: RequestId,
        gvk: String,
        namespace: String,
        name: String,
        operation: String,
        object: Value,
    },
    WebhookValidationResponse {
        request_id: RequestId,
        responder_id: String,
        allowed: bool,
        reason: String,
    },
}

impl EventPayload {
    /// The stable dotted type tag.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::ControllerStarted { .. } => "controller.started",
            Self::ControllerShutdown { .. } => "controller.shutdown",
            Self::ConfigResourceChanged { .. } => "config.resource.changed",
            Self::ConfigParsed { .. } => "config.parsed",
            Self::ConfigValidationRequest { .. } => "config.validation.request",
            Self::ConfigValidationResponse { .. } => "config.validation.response",
            Self::ConfigValidated { .. } => "config.validated",
            Self::ConfigInvalid { .. } => "config.invalid",
            Self::ConfigPublished { .. } => "config.published",
            Self::SecretResourceChanged { .. } => "secret.resource.changed",
            Self::CredentialsUpdated { .. } => "credentials.updated",
            Self::CredentialsInvalid { .. } => "credentials.invalid",
            Self::ResourceIndexUpdated { .. } => "resource.index.updated",
            Self::IndexSynchronized { .. } => "index.synchronized",
            Self::TemplateRendered { .. } => "template.rendered",
            Self::TemplateRenderFailed { .. } => "template.render.failed",
            Self::ValidationStarted { .. } => "validation.started",
            Self::ValidationCompleted { .. } => "validation.completed",
            Self::ValidationFailed { .. } => "validation.failed",
            Self::PodsDiscovered { .. } => "haproxy.pods.discovered",
            Self::DeploymentScheduled { .. } => "deployment.scheduled",
            Self::DeploymentStarted { .. } => "deployment.started",
            Self::InstanceDeployed { .. } => "instance.deployed",
            Self::InstanceDeploymentFailed { .. } => "instance.deployment.failed",
            Self::DeploymentCompleted { .. } => "deployment.completed",
            Self::DriftPreventionTriggered { .. } => "drift.prevention.triggered",
            Self::LeaderElectionStarted { .. } => "leader.election.started",
            Self::BecameLeader { .. } => "became.leader",
            Self::LostLeadership { .. } => "lost.leadership",
            Self::NewLeaderObserved { .. } => "new.leader.observed",
            Self::WebhookValidationRequest { .. } => "webhook.validation.request",
            Self::WebhookValidationResponse { .. } => "webhook.validation.response",
        }
    }

    /// The request id, for request-shaped payloads.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::ConfigValidationRequest { request_id, .. }
            | Self::WebhookValidationRequest { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Response-to-request linkage, for response-shaped payloads.
    pub fn correlation(&self) -> Option<Correlation<'_>> {
        match self {
            Self::ConfigValidationResponse {
                request_id,
                responder_id,
                ..
            }
            | Self::WebhookValidationResponse {
                request_id,
                responder_id,
                ..
            } => Some(Correlation {
                request_id: *request_id,
                responder_id,
            }),
            _ => None,
        }
    }

    /// Compact JSON projection. Bulky bodies (configs, rendered output,
    /// opaque source objects) are reduced to sizes and versions.
    pub fn summary(&self) -> Value {
        match self {
            Self::ControllerStarted {
                config_version,
                secret_version,
            } => json!({"config_version": config_version, "secret_version": secret_version}),
            Self::ControllerShutdown { reason } => json!({"reason": reason}),
            Self::ConfigResourceChanged { object } => {
                json!({"version": haptic_primitives::source_version(object)})
            }
            Self::ConfigParsed {
                version,
                secret_version,
                ..
            } => json!({"version": version, "secret_version": secret_version}),
            Self::ConfigValidationRequest {
                request_id,
                version,
                ..
            } => json!({"request_id": request_id, "version": version}),
            Self::ConfigValidationResponse {
                request_id,
                responder_id,
                valid,
                errors,
            } => json!({
                "request_id": request_id,
                "responder_id": responder_id,
                "valid": valid,
                "errors": errors,
            }),
            Self::ConfigValidated { version, .. } => json!({"version": version}),
            Self::ConfigInvalid { version, errors } => {
                json!({"version": version, "errors": errors})
            }
            Self::ConfigPublished { name, namespace } => {
                json!({"name": name, "namespace": namespace})
            }
            Self::SecretResourceChanged { object } => {
                json!({"version": haptic_primitives::source_version(object)})
            }
            Self::CredentialsUpdated {
                credentials,
                version,
            } => json!({"version": version, "has_dataplane_creds": credentials.has_dataplane_creds()}),
            Self::CredentialsInvalid { version, error } => {
                json!({"version": version, "error": error})
            }
            Self::ResourceIndexUpdated {
                resource_type,
                change,
            } => json!({"resource_type": resource_type, "change": change}),
            Self::IndexSynchronized { resource_counts } => {
                json!({"resource_counts": resource_counts})
            }
            Self::TemplateRendered { output, duration } => json!({
                "bytes": output.byte_size(),
                "aux_files": output.aux.file_count(),
                "duration_ms": duration.as_millis() as u64,
            }),
            Self::TemplateRenderFailed {
                template_name,
                error,
            } => json!({"template": template_name, "error": error}),
            Self::ValidationStarted { endpoints } => json!({"endpoints": endpoints.len()}),
            Self::ValidationCompleted {
                endpoints,
                warnings,
                duration,
            } => json!({
                "endpoints": endpoints.len(),
                "warnings": warnings,
                "duration_ms": duration.as_millis() as u64,
            }),
            Self::ValidationFailed {
                endpoints,
                errors,
                duration,
            } => json!({
                "endpoints": endpoints.len(),
                "errors": errors,
                "duration_ms": duration.as_millis() as u64,
            }),
            Self::PodsDiscovered { endpoints } => json!({
                "count": endpoints.len(),
                "endpoints": endpoints,
            }),
            Self::DeploymentScheduled {
                output,
                endpoints,
                runtime_config_name,
                runtime_config_namespace,
                reason,
            } => json!({
                "bytes": output.byte_size(),
                "endpoints": endpoints.len(),
                "runtime_config": format!("{runtime_config_namespace}/{runtime_config_name}"),
                "reason": reason,
            }),
            Self::DeploymentStarted { endpoints } => json!({"endpoints": endpoints.len()}),
            Self::InstanceDeployed {
                endpoint,
                duration,
                reload_required,
            } => json!({
                "endpoint": endpoint,
                "duration_ms": duration.as_millis() as u64,
                "reload_required": reload_required,
            }),
            Self::InstanceDeploymentFailed {
                endpoint,
                error,
                retryable,
            } => json!({"endpoint": endpoint, "error": error, "retryable": retryable}),
            Self::DeploymentCompleted {
                total,
                succeeded,
                failed,
                duration,
            } => json!({
                "total": total,
                "succeeded": succeeded,
                "failed": failed,
                "duration_ms": duration.as_millis() as u64,
            }),
            Self::DriftPreventionTriggered {
                time_since_last_deployment,
            } => json!({"time_since_last_deployment_ms": time_since_last_deployment.as_millis() as u64}),
            Self::LeaderElectionStarted {
                identity,
                lease_name,
                lease_namespace,
            } => json!({
                "identity": identity,
                "lease": format!("{lease_namespace}/{lease_name}"),
            }),
            Self::BecameLeader { identity } => json!({"identity": identity}),
            Self::LostLeadership { identity, reason } => {
                json!({"identity": identity, "reason": reason})
            }
            Self::NewLeaderObserved { identity, is_self } => {
                json!({"identity": identity, "is_self": is_self})
            }
            Self::WebhookValidationRequest {
                request_id,
                gvk,
                namespace,
                name,
                operation,
                ..
            } => json!({
                "request_id": request_id,
                "gvk": gvk,
                "namespace": namespace,
                "name": name,
                "operation": operation,
            }),
            Self::WebhookValidationResponse {
                request_id,
                responder_id,
                allowed,
                reason,
            } => json!({
                "request_id": request_id,
                "responder_id": responder_id,
                "allowed": allowed,
                "reason": reason,
            }),
        }
    }
}
