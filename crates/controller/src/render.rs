//! Template renderer: validated config + index snapshot → rendered output.

use std::sync::Arc;
use std::time::Instant;

use haptic_bus::{EventBus, FIREHOSE_BUFFER, Subscription};
use haptic_events::{Event, EventPayload};
use haptic_primitives::ControllerConfig;
use tokio_util::sync::CancellationToken;

use crate::external::{ResourceIndex, TemplateEngine};

/// Renders on every `config.validated` and on every `index.synchronized`
/// once a validated config is cached. Rendering failures surface as
/// `template.render.failed`; the previously rendered output stays deployed.
pub struct Renderer {
    bus: EventBus,
    sub: Subscription,
    engine: Arc<dyn TemplateEngine>,
    index: Arc<dyn ResourceIndex>,
    config: Option<Arc<ControllerConfig>>,
}

impl Renderer {
    pub fn new(
        bus: &EventBus,
        engine: Arc<dyn TemplateEngine>,
        index: Arc<dyn ResourceIndex>,
    ) -> Self {
        Self {
            bus: bus.clone(),
            // Index synchronization can be chatty during the initial sync.
            sub: bus.subscribe("renderer", FIREHOSE_BUFFER),
            engine,
            index,
            config: None,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.sub.recv() => {
                    let Some(event) = event else { break };
                    match event.payload() {
                        EventPayload::ConfigValidated { config, .. } => {
                            self.config = Some(config.clone());
                            self.render();
                        }
                        EventPayload::IndexSynchronized { .. } => self.render(),
                        _ => {}
                    }
                }
            }
        }
        tracing::debug!("renderer stopped");
    }

    fn render(&self) {
        let Some(config) = &self.config else {
            tracing::debug!("index synchronized before first validated config, skipping render");
            return;
        };
        let snapshot = self.index.snapshot();
        let started = Instant::now();
        match self.engine.render(config, &snapshot) {
            Ok(output) => {
                let duration = started.elapsed();
                tracing::info!(
                    bytes = output.byte_size(),
                    aux_files = output.aux.file_count(),
                    duration_ms = duration.as_millis() as u64,
                    "templates rendered"
                );
                metrics::histogram!("haptic_render_duration_seconds")
                    .record(duration.as_secs_f64());
                self.bus.publish(Event::new(EventPayload::TemplateRendered {
                    output: Arc::new(output),
                    duration,
                }));
            }
            Err(err) => {
                tracing::warn!(
                    template = %err.template_name,
                    error = %err.message,
                    "template render failed"
                );
                self.bus.publish(Event::new(EventPayload::TemplateRenderFailed {
                    template_name: err.template_name,
                    error: err.message,
                }));
            }
        }
    }
}
