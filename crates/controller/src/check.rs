//! Syntax/semantic validation of rendered configs.

use std::sync::Arc;
use std::time::Instant;

use haptic_bus::{CONTROL_BUFFER, EventBus, Subscription};
use haptic_events::{Event, EventPayload};
use tokio_util::sync::CancellationToken;

use crate::external::SyntaxChecker;

/// Runs the external syntax checker over every `template.rendered` output.
/// A passing check publishes `validation.completed`, which is what promotes
/// the rendered config into the scheduler's deployable slot; a failing one
/// publishes `validation.failed` and nothing gets scheduled.
pub struct RenderedChecker {
    bus: EventBus,
    sub: Subscription,
    checker: Arc<dyn SyntaxChecker>,
}

impl RenderedChecker {
    pub fn new(bus: &EventBus, checker: Arc<dyn SyntaxChecker>) -> Self {
        Self {
            bus: bus.clone(),
            sub: bus.subscribe("rendered-checker", CONTROL_BUFFER),
            checker,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.sub.recv() => {
                    let Some(event) = event else { break };
                    if let EventPayload::TemplateRendered { output, .. } = event.payload() {
                        self.check(output.clone()).await;
                    }
                }
            }
        }
        tracing::debug!("rendered checker stopped");
    }

    async fn check(&self, output: Arc<haptic_primitives::RenderedOutput>) {
        self.bus.publish(Event::new(EventPayload::ValidationStarted {
            endpoints: Vec::new(),
        }));
        let started = Instant::now();
        match self.checker.check(&output).await {
            Ok(warnings) => {
                let duration = started.elapsed();
                tracing::info!(
                    warnings = warnings.len(),
                    duration_ms = duration.as_millis() as u64,
                    "rendered config validated"
                );
                self.bus.publish(Event::new(EventPayload::ValidationCompleted {
                    endpoints: Vec::new(),
                    warnings,
                    duration,
                }));
            }
            Err(err) => {
                let duration = started.elapsed();
                tracing::warn!(errors = ?err.errors, "rendered config rejected");
                self.bus.publish(Event::new(EventPayload::ValidationFailed {
                    endpoints: Vec::new(),
                    errors: err.errors,
                    duration,
                }));
            }
        }
    }
}
