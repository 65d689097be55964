//! Webhook request counters exposed through introspection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use haptic_introspection::VarRegistry;
use serde_json::json;

#[derive(Debug, Default)]
pub struct WebhookStats {
    requests: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    errors: AtomicU64,
}

impl WebhookStats {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("haptic_webhook_requests_total").increment(1);
    }

    pub fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("haptic_webhook_reviews_total", "outcome" => "allowed").increment(1);
    }

    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("haptic_webhook_reviews_total", "outcome" => "denied").increment(1);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("haptic_webhook_reviews_total", "outcome" => "error").increment(1);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "requests": self.requests.load(Ordering::Relaxed),
            "allowed": self.allowed.load(Ordering::Relaxed),
            "denied": self.denied.load(Ordering::Relaxed),
            "errors": self.errors.load(Ordering::Relaxed),
        })
    }

    /// Registers the `webhook/*` variables.
    pub fn register_vars(
        self: &Arc<Self>,
        registry: &VarRegistry,
        listen_addr: String,
        path: String,
        cert_path: String,
        key_path: String,
    ) {
        let stats = Arc::clone(self);
        registry.register("webhook/stats", Arc::new(move || Ok(stats.snapshot())));

        let loaded_at = jiff::Timestamp::now();
        registry.register(
            "webhook/server",
            Arc::new(move || {
                Ok(json!({
                    "addr": listen_addr.clone(),
                    "path": path.clone(),
                    "tls": true,
                }))
            }),
        );
        registry.register(
            "webhook/cert",
            Arc::new(move || {
                Ok(json!({
                    "cert_path": cert_path.clone(),
                    "key_path": key_path.clone(),
                    "loaded_at": loaded_at,
                }))
            }),
        );
    }
}
