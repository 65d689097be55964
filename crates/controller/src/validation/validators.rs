//! The four built-in validators.

use std::sync::Arc;

use async_trait::async_trait;
use haptic_primitives::{ControllerConfig, JsonPath};

use crate::external::{IndexSnapshot, SyntaxChecker, TemplateEngine};

use super::ConfigValidator;

/// Structural checks beyond what parsing enforces.
pub struct BasicValidator;

#[async_trait]
impl ConfigValidator for BasicValidator {
    fn id(&self) -> &'static str {
        "basic"
    }

    async fn validate(&self, config: &ControllerConfig) -> Result<(), Vec<String>> {
        let errors = config.structural_errors();
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Compile-checks every template through the engine.
pub struct TemplateValidator {
    engine: Arc<dyn TemplateEngine>,
}

impl TemplateValidator {
    pub fn new(engine: Arc<dyn TemplateEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ConfigValidator for TemplateValidator {
    fn id(&self) -> &'static str {
        "template"
    }

    async fn validate(&self, config: &ControllerConfig) -> Result<(), Vec<String>> {
        self.engine
            .compile_check(config)
            .map_err(|err| vec![err.to_string()])
    }
}

/// Parses every watched-resource index expression.
pub struct JsonPathValidator;

#[async_trait]
impl ConfigValidator for JsonPathValidator {
    fn id(&self) -> &'static str {
        "jsonpath"
    }

    async fn validate(&self, config: &ControllerConfig) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for (name, resource) in &config.watched_resources {
            for expression in &resource.index_by {
                if let Err(err) = JsonPath::parse(expression) {
                    errors.push(format!(
                        "watched_resources.{name}: {expression:?}: {err}"
                    ));
                }
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Renders against an empty index and syntax-checks the result, so a config
/// that cannot possibly produce a loadable haproxy.cfg is caught before it
/// ever reaches the pipeline.
pub struct DryRunValidator {
    engine: Arc<dyn TemplateEngine>,
    checker: Arc<dyn SyntaxChecker>,
}

impl DryRunValidator {
    pub fn new(engine: Arc<dyn TemplateEngine>, checker: Arc<dyn SyntaxChecker>) -> Self {
        Self { engine, checker }
    }
}

#[async_trait]
impl ConfigValidator for DryRunValidator {
    fn id(&self) -> &'static str {
        "dryrun"
    }

    async fn validate(&self, config: &ControllerConfig) -> Result<(), Vec<String>> {
        let output = self
            .engine
            .render(config, &IndexSnapshot::default())
            .map_err(|err| vec![err.to_string()])?;
        self.checker
            .check(&output)
            .await
            .map(|_warnings| ())
            .map_err(|err| err.errors)
    }
}
