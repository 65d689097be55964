//! Config validation: independent validators, scatter-gather coordination.
//!
//! Each validator runs inside a [`ValidatorHost`], an ordinary bus component
//! that answers both `config.validation.request` (asynchronous pipeline
//! validation) and `webhook.validation.request` (synchronous admission
//! checks). A validator always responds, even to malformed input, so the
//! coordinator and the webhook can make progress.

mod coordinator;
mod validators;

pub use coordinator::ValidationCoordinator;
pub use validators::{BasicValidator, DryRunValidator, JsonPathValidator, TemplateValidator};

use std::sync::Arc;

use async_trait::async_trait;
use haptic_bus::{CONTROL_BUFFER, EventBus, Subscription};
use haptic_events::{Event, EventPayload};
use haptic_primitives::ControllerConfig;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One independent validation check, identified by a stable id.
#[async_trait]
pub trait ConfigValidator: Send + Sync {
    fn id(&self) -> &'static str;

    /// `Err` carries the individual findings; an empty finding list is not a
    /// valid dissent.
    async fn validate(&self, config: &ControllerConfig) -> Result<(), Vec<String>>;
}

/// Hosts a validator on the bus, answering both validation request kinds.
pub struct ValidatorHost {
    bus: EventBus,
    sub: Subscription,
    validator: Arc<dyn ConfigValidator>,
}

impl ValidatorHost {
    pub fn new(bus: &EventBus, validator: Arc<dyn ConfigValidator>) -> Self {
        let name = format!("validator-{}", validator.id());
        Self {
            bus: bus.clone(),
            sub: bus.subscribe(name, CONTROL_BUFFER),
            validator,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.sub.recv() => {
                    let Some(event) = event else { break };
                    match event.payload() {
                        EventPayload::ConfigValidationRequest {
                            request_id, config, ..
                        } => {
                            let verdict = self.validator.validate(config).await;
                            let (valid, errors) = match verdict {
                                Ok(()) => (true, Vec::new()),
                                Err(errors) => (false, errors),
                            };
                            self.bus.publish(Event::new(EventPayload::ConfigValidationResponse {
                                request_id: *request_id,
                                responder_id: self.validator.id().to_owned(),
                                valid,
                                errors,
                            }));
                        }
                        EventPayload::WebhookValidationRequest {
                            request_id, object, ..
                        } => {
                            let (allowed, reason) = self.admit(object).await;
                            self.bus.publish(Event::new(EventPayload::WebhookValidationResponse {
                                request_id: *request_id,
                                responder_id: self.validator.id().to_owned(),
                                allowed,
                                reason,
                            }));
                        }
                        _ => {}
                    }
                }
            }
        }
        tracing::debug!(validator = self.validator.id(), "validator host stopped");
    }

    /// Admission path: extract the candidate config from the reviewed object
    /// and run the same check. Extraction failures are denials, not errors.
    async fn admit(&self, object: &Value) -> (bool, String) {
        let document = match object.pointer("/data/config").and_then(Value::as_str) {
            Some(document) => document,
            None => return (false, "object has no data.config key".to_owned()),
        };
        let config = match ControllerConfig::from_toml(document) {
            Ok(config) => config,
            Err(err) => return (false, err.to_string()),
        };
        match self.validator.validate(&config).await {
            Ok(()) => (true, String::new()),
            Err(errors) => (false, errors.join("; ")),
        }
    }
}
