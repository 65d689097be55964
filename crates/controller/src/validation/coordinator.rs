//! Scatter-gather aggregation of validator verdicts.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use haptic_bus::{CONTROL_BUFFER, EventBus, RequestOptions, Subscription};
use haptic_events::{Event, EventPayload};
use tokio_util::sync::CancellationToken;

const FALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// On every `config.parsed`, asks the expected validator set for verdicts
/// and publishes the aggregate: `config.validated` only when every expected
/// responder answered valid, `config.invalid` otherwise, with missing
/// responders attributed a `timeout` dissent.
pub struct ValidationCoordinator {
    bus: EventBus,
    sub: Subscription,
    expected: BTreeSet<String>,
}

impl ValidationCoordinator {
    pub fn new<I, S>(bus: &EventBus, expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bus: bus.clone(),
            sub: bus.subscribe("validation-coordinator", CONTROL_BUFFER),
            expected: expected.into_iter().map(Into::into).collect(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.sub.recv() => {
                    let Some(event) = event else { break };
                    if let EventPayload::ConfigParsed { config, version, .. } = event.payload() {
                        self.coordinate(config.clone(), version.clone()).await;
                    }
                }
            }
        }
        tracing::debug!("validation coordinator stopped");
    }

    async fn coordinate(
        &self,
        config: std::sync::Arc<haptic_primitives::ControllerConfig>,
        version: String,
    ) {
        let timeout = config
            .deployment
            .validation_timeout
            .try_into()
            .unwrap_or(FALLBACK_TIMEOUT);
        let request_config = config.clone();
        let request_version = version.clone();
        let outcome = self
            .bus
            .request(
                RequestOptions::new(self.expected.iter().cloned(), timeout),
                move |request_id| {
                    Event::new(EventPayload::ConfigValidationRequest {
                        request_id,
                        config: request_config,
                        version: request_version,
                    })
                },
            )
            .await;

        let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for response in &outcome.responses {
            if let EventPayload::ConfigValidationResponse {
                responder_id,
                valid,
                errors: findings,
                ..
            } = response.payload()
            {
                if !valid {
                    errors.insert(responder_id.clone(), findings.clone());
                }
            }
        }
        for missing in &outcome.missing {
            errors.insert(missing.clone(), vec!["timeout".to_owned()]);
        }

        if errors.is_empty() {
            tracing::info!(%version, validators = self.expected.len(), "configuration validated");
            self.bus.publish(Event::new(EventPayload::ConfigValidated {
                config,
                version,
            }));
        } else {
            tracing::warn!(%version, dissenting = errors.len(), "configuration invalid");
            self.bus.publish(Event::new(EventPayload::ConfigInvalid {
                version,
                errors,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::stub::{StubChecker, StubEngine};
    use crate::validation::{
        BasicValidator, DryRunValidator, JsonPathValidator, TemplateValidator, ValidatorHost,
    };
    use haptic_primitives::ControllerConfig;

    const ALL: [&str; 4] = ["basic", "template", "jsonpath", "dryrun"];

    fn spawn_all_validators(bus: &EventBus, cancel: &CancellationToken) {
        let engine = Arc::new(StubEngine::new());
        let checker = Arc::new(StubChecker::ok());
        let hosts = [
            ValidatorHost::new(bus, Arc::new(BasicValidator)),
            ValidatorHost::new(bus, Arc::new(TemplateValidator::new(engine.clone()))),
            ValidatorHost::new(bus, Arc::new(JsonPathValidator)),
            ValidatorHost::new(bus, Arc::new(DryRunValidator::new(engine, checker))),
        ];
        for host in hosts {
            tokio::spawn(host.run(cancel.clone()));
        }
    }

    fn parsed_event(version: &str, document: &str) -> Event {
        Event::new(EventPayload::ConfigParsed {
            config: Arc::new(ControllerConfig::from_toml(document).unwrap()),
            version: version.into(),
            secret_version: String::new(),
        })
    }

    #[tokio::test]
    async fn validated_when_every_responder_agrees() {
        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        let coordinator = ValidationCoordinator::new(&bus, ALL);
        spawn_all_validators(&bus, &cancel);
        let mut watcher = bus.subscribe("test", 50);
        bus.start();
        tokio::spawn(coordinator.run(cancel.clone()));

        bus.publish(parsed_event("v1", "[templates]\nmain = \"global\"\n"));

        let validated = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let event = watcher.recv().await.unwrap();
                if let EventPayload::ConfigValidated { version, .. } = event.payload() {
                    break version.clone();
                }
            }
        })
        .await
        .expect("config.validated within one second");
        assert_eq!(validated, "v1");
        cancel.cancel();
    }

    #[tokio::test]
    async fn dissent_is_attributed_to_the_validator() {
        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        let coordinator = ValidationCoordinator::new(&bus, ALL);
        spawn_all_validators(&bus, &cancel);
        let mut watcher = bus.subscribe("test", 50);
        bus.start();
        tokio::spawn(coordinator.run(cancel.clone()));

        // Parses fine, but the main template is blank.
        bus.publish(parsed_event("v2", "[templates]\nmain = \"\"\n"));

        loop {
            let event = watcher.recv().await.unwrap();
            if let EventPayload::ConfigInvalid { version, errors } = event.payload() {
                assert_eq!(version, "v2");
                assert!(errors.contains_key("basic"));
                assert!(!errors.contains_key("jsonpath"));
                break;
            }
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn missing_responder_times_out_by_name() {
        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        // Expect a validator that is not running.
        let coordinator = ValidationCoordinator::new(&bus, ["basic", "ghost"]);
        tokio::spawn(ValidatorHost::new(&bus, Arc::new(BasicValidator)).run(cancel.clone()));
        let mut watcher = bus.subscribe("test", 50);
        bus.start();
        tokio::spawn(coordinator.run(cancel.clone()));

        bus.publish(parsed_event(
            "v3",
            "[templates]\nmain = \"global\"\n[deployment]\nvalidation_timeout = \"100ms\"\n",
        ));

        loop {
            let event = watcher.recv().await.unwrap();
            if let EventPayload::ConfigInvalid { errors, .. } = event.payload() {
                assert_eq!(errors["ghost"], vec!["timeout".to_owned()]);
                break;
            }
        }
        cancel.cancel();
    }
}
