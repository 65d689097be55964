//! Interfaces of the collaborators outside the coordination core.
//!
//! The Kubernetes watch plumbing, the template engine, the HAProxy syntax
//! checker and the data-plane client all live behind these traits; the
//! pipeline only ever sees them as trait objects. The `stub` module carries
//! deterministic in-process implementations for tests and standalone runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use haptic_primitives::{ControllerConfig, Endpoint, RenderedOutput};
use serde_json::Value;

/// Point-in-time view of the resource index, keyed by watched-resource name.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub resources: BTreeMap<String, Vec<Value>>,
}

impl IndexSnapshot {
    /// Object counts per resource type, as exposed by introspection.
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.resources
            .iter()
            .map(|(name, objects)| (name.clone(), objects.len() as u64))
            .collect()
    }
}

/// Read interface of the externally-maintained resource index.
pub trait ResourceIndex: Send + Sync {
    fn snapshot(&self) -> IndexSnapshot;
}

/// A failed template compile or render.
#[derive(Debug, Clone, thiserror::Error)]
#[error("template {template_name}: {message}")]
pub struct TemplateError {
    pub template_name: String,
    pub message: String,
}

/// The template engine. `render` MUST be deterministic for identical inputs.
pub trait TemplateEngine: Send + Sync {
    /// Compile-checks every template in the config without rendering.
    fn compile_check(&self, config: &ControllerConfig) -> Result<(), TemplateError>;

    fn render(
        &self,
        config: &ControllerConfig,
        snapshot: &IndexSnapshot,
    ) -> Result<RenderedOutput, TemplateError>;
}

/// Syntax/semantic errors from checking a rendered config.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", errors.join("; "))]
pub struct CheckErrors {
    pub errors: Vec<String>,
}

/// Checks a rendered configuration (e.g. `haproxy -c` against a scratch
/// instance). Ok carries non-fatal warnings.
#[async_trait]
pub trait SyntaxChecker: Send + Sync {
    async fn check(&self, output: &RenderedOutput) -> Result<Vec<String>, CheckErrors>;
}

/// Result of one successful endpoint apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncResult {
    /// Whether the instance needed a reload to pick the config up.
    pub reload_required: bool,
}

/// A failed endpoint apply.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ApplyError {
    pub message: String,
    /// Transient failures are reported as retryable; re-convergence happens
    /// on the next trigger event, the deployer itself never retries.
    pub retryable: bool,
}

/// The HAProxy data-plane client.
#[async_trait]
pub trait DataplaneClient: Send + Sync {
    async fn apply(
        &self,
        endpoint: &Endpoint,
        output: &RenderedOutput,
    ) -> Result<SyncResult, ApplyError>;
}
