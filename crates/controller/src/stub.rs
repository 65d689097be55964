//! Deterministic in-process stand-ins for the external collaborators.
//!
//! Used by the test suites and by the binary's standalone mode, where no
//! cluster, template engine or data plane is attached. Behavior is fixed
//! and knob-driven so failure paths stay exercisable.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use haptic_primitives::{AuxFiles, ControllerConfig, Endpoint, RenderedOutput};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::external::{
    ApplyError, CheckErrors, DataplaneClient, IndexSnapshot, ResourceIndex, SyncResult,
    SyntaxChecker, TemplateEngine, TemplateError,
};
use crate::leader::LeaseState;

/// A resource index whose snapshot is set by hand.
#[derive(Default)]
pub struct StaticIndex {
    snapshot: Mutex<IndexSnapshot>,
}

impl StaticIndex {
    pub fn set(&self, snapshot: IndexSnapshot) {
        *self.snapshot.lock() = snapshot;
    }
}

impl ResourceIndex for StaticIndex {
    fn snapshot(&self) -> IndexSnapshot {
        self.snapshot.lock().clone()
    }
}

/// A template engine that echoes templates back with a deterministic header.
#[derive(Default)]
pub struct StubEngine {
    fail_compile: Option<String>,
    fail_render: Option<String>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_compile(message: impl Into<String>) -> Self {
        Self {
            fail_compile: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failing_render(message: impl Into<String>) -> Self {
        Self {
            fail_render: Some(message.into()),
            ..Self::default()
        }
    }
}

impl TemplateEngine for StubEngine {
    fn compile_check(&self, _config: &ControllerConfig) -> Result<(), TemplateError> {
        match &self.fail_compile {
            Some(message) => Err(TemplateError {
                template_name: "main".to_owned(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn render(
        &self,
        config: &ControllerConfig,
        snapshot: &IndexSnapshot,
    ) -> Result<RenderedOutput, TemplateError> {
        if let Some(message) = &self.fail_render {
            return Err(TemplateError {
                template_name: "main".to_owned(),
                message: message.clone(),
            });
        }
        let counts = snapshot.counts();
        let main = format!(
            "# {} resource types indexed\n{}",
            counts.len(),
            config.templates.main
        );
        Ok(RenderedOutput {
            main,
            aux: AuxFiles {
                maps: config.templates.maps.clone(),
                certificates: config.templates.certificates.clone(),
                files: config.templates.files.clone(),
            },
        })
    }
}

/// A syntax checker with canned warnings or errors.
#[derive(Default)]
pub struct StubChecker {
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl StubChecker {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            warnings: vec![message.into()],
            ..Self::default()
        }
    }

    pub fn failing<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            errors: errors.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl SyntaxChecker for StubChecker {
    async fn check(&self, _output: &RenderedOutput) -> Result<Vec<String>, CheckErrors> {
        if self.errors.is_empty() {
            Ok(self.warnings.clone())
        } else {
            Err(CheckErrors {
                errors: self.errors.clone(),
            })
        }
    }
}

/// A data-plane client recording applies, with per-endpoint failures.
#[derive(Default)]
pub struct StubDataplane {
    failures: Mutex<HashMap<String, bool>>,
    applied: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

impl StubDataplane {
    /// Makes every apply against the named endpoint fail.
    pub fn fail_endpoint(&self, name: impl Into<String>, retryable: bool) {
        self.failures.lock().insert(name.into(), retryable);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Endpoint names applied so far, in apply order.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl DataplaneClient for StubDataplane {
    async fn apply(
        &self,
        endpoint: &Endpoint,
        _output: &RenderedOutput,
    ) -> Result<SyncResult, ApplyError> {
        self.applied.lock().push(endpoint.name.clone());
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(retryable) = self.failures.lock().get(&endpoint.name).copied() {
            return Err(ApplyError {
                message: format!("apply to {} refused by stub", endpoint.name),
                retryable,
            });
        }
        Ok(SyncResult {
            reload_required: true,
        })
    }
}

/// A lease that grants leadership immediately and never revokes it. The
/// sender half is kept so standalone shutdown can drop the lease cleanly.
pub fn immediate_leader_lease() -> (watch::Sender<LeaseState>, watch::Receiver<LeaseState>) {
    watch::channel(LeaseState::Leader)
}

/// Builds a ConfigMap-shaped source object around a config document.
pub fn configmap_object(name: &str, namespace: &str, version: &str, document: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": version,
        },
        "data": {"config": document},
    })
}

/// Builds a Secret-shaped source object with base64-encoded values.
pub fn secret_object(name: &str, namespace: &str, version: &str, data: &[(&str, &str)]) -> Value {
    use base64::Engine as _;
    let encoded: serde_json::Map<String, Value> = data
        .iter()
        .map(|(key, value)| {
            (
                (*key).to_owned(),
                Value::String(base64::engine::general_purpose::STANDARD.encode(value)),
            )
        })
        .collect();
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": version,
        },
        "data": encoded,
    })
}
