//! Credentials loader: secret object in, typed credentials out.

use haptic_bus::{CONTROL_BUFFER, EventBus, Subscription};
use haptic_events::{Event, EventPayload};
use haptic_primitives::{BasicAuth, Credentials, source_version};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Extracts data-plane credentials from the controller's Secret and
/// publishes `credentials.updated` / `credentials.invalid`. Raw secret
/// bytes never leave this component in any other shape than the redacted
/// [`Credentials`] value.
pub struct CredentialsLoader {
    bus: EventBus,
    sub: Subscription,
}

impl CredentialsLoader {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            bus: bus.clone(),
            sub: bus.subscribe("credentials-loader", CONTROL_BUFFER),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.sub.recv() => {
                    let Some(event) = event else { break };
                    if let EventPayload::SecretResourceChanged { object } = event.payload() {
                        self.load(object);
                    }
                }
            }
        }
        tracing::debug!("credentials loader stopped");
    }

    fn load(&self, object: &Value) {
        let secret = match haptic_primitives::source::parse_secret_source(object) {
            Ok(secret) => secret,
            Err(err) => {
                let version = source_version(object).unwrap_or_default();
                tracing::warn!(%version, error = %err, "credentials secret rejected");
                self.bus.publish(Event::new(EventPayload::CredentialsInvalid {
                    version,
                    error: err.to_string(),
                }));
                return;
            }
        };

        let dataplane = match (secret.utf8("username"), secret.utf8("password")) {
            (Some(username), Some(password)) => Some(BasicAuth::new(username, password)),
            (None, None) => None,
            // One half of the pair present is a misconfigured secret.
            _ => {
                tracing::warn!(version = %secret.version, "credentials secret rejected");
                self.bus.publish(Event::new(EventPayload::CredentialsInvalid {
                    version: secret.version,
                    error: "secret must carry both username and password or neither".to_owned(),
                }));
                return;
            }
        };

        let credentials = Credentials::new(secret.version.clone(), dataplane);
        tracing::info!(
            version = %secret.version,
            has_dataplane_creds = credentials.has_dataplane_creds(),
            "credentials updated"
        );
        self.bus.publish(Event::new(EventPayload::CredentialsUpdated {
            credentials,
            version: secret.version,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publishes_updated_credentials() {
        let bus = EventBus::new();
        let loader = CredentialsLoader::new(&bus);
        let mut watcher = bus.subscribe("test", 50);
        bus.start();
        tokio::spawn(loader.run(CancellationToken::new()));

        bus.publish(Event::new(EventPayload::SecretResourceChanged {
            object: json!({
                "metadata": {"name": "creds", "namespace": "ingress", "resourceVersion": "9"},
                "data": {"username": "YWRtaW4=", "password": "aHVudGVyMg=="},
            }),
        }));

        loop {
            let event = watcher.recv().await.unwrap();
            if let EventPayload::CredentialsUpdated { credentials, version } = event.payload() {
                assert_eq!(version, "9");
                assert!(credentials.has_dataplane_creds());
                assert_eq!(credentials.dataplane().unwrap().username(), "admin");
                break;
            }
        }
    }

    #[tokio::test]
    async fn half_a_credential_pair_is_invalid() {
        let bus = EventBus::new();
        let loader = CredentialsLoader::new(&bus);
        let mut watcher = bus.subscribe("test", 50);
        bus.start();
        tokio::spawn(loader.run(CancellationToken::new()));

        bus.publish(Event::new(EventPayload::SecretResourceChanged {
            object: json!({
                "metadata": {"name": "creds", "namespace": "ingress", "resourceVersion": "10"},
                "data": {"username": "YWRtaW4="},
            }),
        }));

        loop {
            let event = watcher.recv().await.unwrap();
            if let EventPayload::CredentialsInvalid { version, error } = event.payload() {
                assert_eq!(version, "10");
                assert!(error.contains("username and password"));
                break;
            }
        }
    }
}
