//! Shared domain model for the haptic ingress controller.
//!
//! This crate is the leaf both the event catalog and the pipeline components
//! depend on, so that events can carry typed payloads without a dependency
//! cycle: controller configuration, data-plane credentials, deployment
//! targets, rendered output, source-object parsing, and the kubectl-style
//! JSONPath subset used by the introspection endpoint and the `jsonpath`
//! validator.

pub mod config;
pub mod credentials;
pub mod deploy;
pub mod jsonpath;
pub mod source;

pub use config::{
    ConfigError, ControllerConfig, DataplaneSettings, DeployConcurrency, DeploymentSettings,
    Templates, WatchedResource, WebhookSettings,
};
pub use credentials::{BasicAuth, Credentials};
pub use deploy::{AuxFiles, Endpoint, RenderedOutput};
pub use jsonpath::{EvalError, JsonPath, JsonPathError};
pub use source::{ConfigSource, SecretSource, SourceError, source_version};
