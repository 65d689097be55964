//! Config loader: source object in, typed config out.

use std::collections::BTreeMap;
use std::sync::Arc;

use haptic_bus::{CONTROL_BUFFER, EventBus, Subscription};
use haptic_events::{Event, EventPayload};
use haptic_primitives::{ControllerConfig, source_version};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Parses the controller's ConfigMap into a [`ControllerConfig`] and
/// publishes `config.parsed` / `config.invalid`. Also tracks the latest
/// credentials version so `config.parsed` can carry the secret version in
/// effect. Never panics on malformed input.
pub struct ConfigLoader {
    bus: EventBus,
    sub: Subscription,
    secret_version: String,
}

impl ConfigLoader {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            bus: bus.clone(),
            sub: bus.subscribe("config-loader", CONTROL_BUFFER),
            secret_version: String::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.sub.recv() => {
                    let Some(event) = event else { break };
                    match event.payload() {
                        EventPayload::ConfigResourceChanged { object } => self.load(object),
                        EventPayload::CredentialsUpdated { version, .. } => {
                            self.secret_version = version.clone();
                        }
                        _ => {}
                    }
                }
            }
        }
        tracing::debug!("config loader stopped");
    }

    fn load(&self, object: &Value) {
        let source = match haptic_primitives::source::parse_config_source(object) {
            Ok(source) => source,
            Err(err) => {
                self.publish_invalid(source_version(object).unwrap_or_default(), err.to_string());
                return;
            }
        };
        match ControllerConfig::from_toml(&source.document) {
            Ok(config) => {
                tracing::info!(
                    version = %source.version,
                    config = %format!("{}/{}", source.namespace, source.name),
                    "configuration parsed"
                );
                self.bus.publish(Event::new(EventPayload::ConfigPublished {
                    name: source.name,
                    namespace: source.namespace,
                }));
                self.bus.publish(Event::new(EventPayload::ConfigParsed {
                    config: Arc::new(config),
                    version: source.version,
                    secret_version: self.secret_version.clone(),
                }));
            }
            Err(err) => self.publish_invalid(source.version, err.to_string()),
        }
    }

    fn publish_invalid(&self, version: String, error: String) {
        tracing::warn!(%version, %error, "configuration rejected");
        let mut errors = BTreeMap::new();
        errors.insert("loader".to_owned(), vec![error]);
        self.bus
            .publish(Event::new(EventPayload::ConfigInvalid { version, errors }));
    }
}
