//! Stateless fan-out of scheduled deployments to data-plane endpoints.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt as _;
use haptic_bus::{CONTROL_BUFFER, EventBus, Subscription};
use haptic_events::{Event, EventPayload};
use haptic_primitives::{DeployConcurrency, Endpoint, RenderedOutput};
use tokio_util::sync::CancellationToken;

use crate::external::DataplaneClient;

/// Applies each `deployment.scheduled` to every endpoint and reports the
/// outcome per instance. Holds no state between deployments; retry policy
/// belongs to the triggers, not here. Publishes exactly one
/// `deployment.completed` per consumed `deployment.scheduled`.
pub struct Deployer {
    bus: EventBus,
    sub: Subscription,
    client: Arc<dyn DataplaneClient>,
    concurrency: DeployConcurrency,
    max_parallel: usize,
}

impl Deployer {
    pub fn new(
        bus: &EventBus,
        client: Arc<dyn DataplaneClient>,
        concurrency: DeployConcurrency,
        max_parallel: usize,
    ) -> Self {
        Self {
            bus: bus.clone(),
            sub: bus.subscribe("deployer", CONTROL_BUFFER),
            client,
            concurrency,
            max_parallel: max_parallel.max(1),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.sub.recv() => {
                    let Some(event) = event else { break };
                    if let EventPayload::DeploymentScheduled { output, endpoints, .. } =
                        event.payload()
                    {
                        self.deploy(output.clone(), endpoints.clone(), &cancel).await;
                    }
                }
            }
        }
        tracing::debug!("deployer stopped");
    }

    async fn deploy(
        &self,
        output: Arc<RenderedOutput>,
        endpoints: Vec<Endpoint>,
        cancel: &CancellationToken,
    ) {
        let started = Instant::now();
        let total = endpoints.len();
        self.bus.publish(Event::new(EventPayload::DeploymentStarted {
            endpoints: endpoints.clone(),
        }));

        let (wellformed, malformed): (Vec<_>, Vec<_>) =
            endpoints.into_iter().partition(Endpoint::is_wellformed);
        for endpoint in malformed {
            tracing::warn!(%endpoint, "skipping malformed endpoint record");
            self.bus.publish(Event::new(EventPayload::InstanceDeploymentFailed {
                endpoint,
                error: "malformed endpoint record".to_owned(),
                retryable: false,
            }));
        }

        let succeeded = match self.concurrency {
            DeployConcurrency::Parallel => {
                futures::stream::iter(
                    wellformed
                        .into_iter()
                        .map(|endpoint| self.apply_one(endpoint, &output, cancel)),
                )
                .buffer_unordered(self.max_parallel)
                .filter(|ok| std::future::ready(*ok))
                .count()
                .await
            }
            DeployConcurrency::Sequential => {
                let mut succeeded = 0;
                for endpoint in wellformed {
                    if self.apply_one(endpoint, &output, cancel).await {
                        succeeded += 1;
                    }
                }
                succeeded
            }
        };

        let duration = started.elapsed();
        tracing::info!(
            total,
            succeeded,
            failed = total - succeeded,
            duration_ms = duration.as_millis() as u64,
            "deployment completed"
        );
        metrics::histogram!("haptic_deployment_duration_seconds").record(duration.as_secs_f64());
        self.bus.publish(Event::new(EventPayload::DeploymentCompleted {
            total,
            succeeded,
            failed: total - succeeded,
            duration,
        }));
    }

    /// Applies to one endpoint, publishing the per-instance outcome. Returns
    /// whether the apply succeeded. Once cancelled, no new work starts;
    /// already-running applies finish on their own.
    async fn apply_one(
        &self,
        endpoint: Endpoint,
        output: &RenderedOutput,
        cancel: &CancellationToken,
    ) -> bool {
        if cancel.is_cancelled() {
            self.bus.publish(Event::new(EventPayload::InstanceDeploymentFailed {
                endpoint,
                error: "deployment cancelled".to_owned(),
                retryable: true,
            }));
            return false;
        }
        let started = Instant::now();
        match self.client.apply(&endpoint, output).await {
            Ok(result) => {
                let duration = started.elapsed();
                tracing::debug!(
                    %endpoint,
                    reload_required = result.reload_required,
                    duration_ms = duration.as_millis() as u64,
                    "instance deployed"
                );
                metrics::counter!("haptic_instance_deployments_total", "outcome" => "success")
                    .increment(1);
                self.bus.publish(Event::new(EventPayload::InstanceDeployed {
                    endpoint,
                    duration,
                    reload_required: result.reload_required,
                }));
                true
            }
            Err(err) => {
                tracing::warn!(%endpoint, error = %err, retryable = err.retryable, "instance deployment failed");
                metrics::counter!("haptic_instance_deployments_total", "outcome" => "failure")
                    .increment(1);
                self.bus.publish(Event::new(EventPayload::InstanceDeploymentFailed {
                    endpoint,
                    error: err.message,
                    retryable: err.retryable,
                }));
                false
            }
        }
    }
}
