//! Typed controller configuration.
//!
//! The configuration lives as a TOML document inside the controller's
//! ConfigMap (`data.config`). Parsing is strict (`deny_unknown_fields`) so a
//! typoed section surfaces as a `config.invalid` event instead of silently
//! doing nothing; structural checks beyond what serde can express live in
//! [`ControllerConfig::structural_errors`] and are run by the `basic`
//! validator rather than at parse time.

use std::collections::BTreeMap;

use jiff::SignedDuration;
use serde::{Deserialize, Serialize};

/// Errors produced while parsing a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config document: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Top-level controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    pub templates: Templates,
    /// Cluster resources the index watches, keyed by a short name used in
    /// template context and log fields.
    #[serde(default)]
    pub watched_resources: BTreeMap<String, WatchedResource>,
    #[serde(default)]
    pub deployment: DeploymentSettings,
    #[serde(default)]
    pub dataplane: DataplaneSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
}

/// Template sources: one main HAProxy config plus named auxiliary artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Templates {
    /// The main `haproxy.cfg` template text.
    pub main: String,
    /// Map file templates, keyed by target file name.
    #[serde(default)]
    pub maps: BTreeMap<String, String>,
    /// Certificate templates (PEM payloads assembled from secrets).
    #[serde(default)]
    pub certificates: BTreeMap<String, String>,
    /// General file templates (error pages, lua snippets).
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// One watched cluster resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchedResource {
    pub api_version: String,
    pub kind: String,
    /// JSONPath expressions the index uses to key objects of this type.
    #[serde(default)]
    pub index_by: Vec<String>,
}

/// Deployment pacing and fan-out settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DeploymentSettings {
    /// Minimum wall-clock gap between two `deployment.scheduled` publishes.
    pub min_interval: SignedDuration,
    /// Idle period after which drift prevention re-deploys the last good
    /// config.
    pub drift_interval: SignedDuration,
    /// Scatter-gather deadline for config validation.
    pub validation_timeout: SignedDuration,
    pub concurrency: DeployConcurrency,
    /// Upper bound on in-flight endpoint applies when `concurrency` is
    /// `parallel`.
    pub max_parallel: usize,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            min_interval: SignedDuration::from_secs(5),
            drift_interval: SignedDuration::from_secs(300),
            validation_timeout: SignedDuration::from_secs(5),
            concurrency: DeployConcurrency::Parallel,
            max_parallel: 4,
        }
    }
}

/// How the deployer fans out across endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployConcurrency {
    Parallel,
    Sequential,
}

/// Data-plane API client settings. Credentials come from the secret, not
/// from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DataplaneSettings {
    pub port: u16,
    pub request_timeout: SignedDuration,
}

impl Default for DataplaneSettings {
    fn default() -> Self {
        Self {
            port: 5555,
            request_timeout: SignedDuration::from_secs(10),
        }
    }
}

/// Admission webhook behavior knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WebhookSettings {
    /// Whether requests for kinds with no registered validation function are
    /// allowed through.
    pub allow_unregistered_kinds: bool,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            allow_unregistered_kinds: true,
        }
    }
}

impl ControllerConfig {
    /// Parses a TOML configuration document.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(document)?)
    }

    /// Structural problems serde cannot express. Empty means structurally
    /// sound; the `basic` validator turns a non-empty list into a dissent.
    pub fn structural_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.templates.main.trim().is_empty() {
            errors.push("templates.main must not be empty".to_owned());
        }
        if self.deployment.min_interval.is_negative() {
            errors.push("deployment.min_interval must not be negative".to_owned());
        }
        if self.deployment.drift_interval <= SignedDuration::ZERO {
            errors.push("deployment.drift_interval must be positive".to_owned());
        }
        if self.deployment.validation_timeout <= SignedDuration::ZERO {
            errors.push("deployment.validation_timeout must be positive".to_owned());
        }
        if self.deployment.max_parallel == 0 {
            errors.push("deployment.max_parallel must be at least 1".to_owned());
        }
        if self.dataplane.port == 0 {
            errors.push("dataplane.port must not be zero".to_owned());
        }
        for (name, resource) in &self.watched_resources {
            if resource.api_version.is_empty() {
                errors.push(format!("watched_resources.{name}.api_version must not be empty"));
            }
            if resource.kind.is_empty() {
                errors.push(format!("watched_resources.{name}.kind must not be empty"));
            }
        }
        errors
    }
}
