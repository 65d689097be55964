//! Drift prevention: re-deploy when the pipeline has been idle too long.

use std::time::Duration;

use haptic_bus::{CONTROL_BUFFER, EventBus, Subscription};
use haptic_events::{Event, EventPayload};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One reset-on-completion timer. Every `deployment.completed` re-arms it;
/// on expiry it publishes `drift.prevention.triggered` once and stays
/// disarmed until the next completion. Losing leadership disarms it and
/// forgets the last deployment time.
pub struct DriftMonitor {
    bus: EventBus,
    sub: Subscription,
    interval: Duration,
}

impl DriftMonitor {
    pub fn new(bus: &EventBus, interval: Duration) -> Self {
        Self {
            bus: bus.clone(),
            sub: bus.subscribe("drift-monitor", CONTROL_BUFFER),
            interval,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        // Set on every completion, cleared after firing or losing the lease.
        let mut armed_at: Option<Instant> = None;
        loop {
            if let Some(last_deployment) = armed_at {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = self.sub.recv() => {
                        let Some(event) = event else { break };
                        armed_at = self.rearm(event.payload(), armed_at);
                    }
                    () = tokio::time::sleep_until(last_deployment + self.interval) => {
                        let idle = last_deployment.elapsed();
                        tracing::info!(
                            idle_ms = idle.as_millis() as u64,
                            "drift prevention triggered"
                        );
                        self.bus.publish(Event::new(EventPayload::DriftPreventionTriggered {
                            time_since_last_deployment: idle,
                        }));
                        armed_at = None;
                    }
                }
            } else {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = self.sub.recv() => {
                        let Some(event) = event else { break };
                        armed_at = self.rearm(event.payload(), armed_at);
                    }
                }
            }
        }
        tracing::debug!("drift monitor stopped");
    }

    fn rearm(&self, payload: &EventPayload, armed_at: Option<Instant>) -> Option<Instant> {
        match payload {
            EventPayload::DeploymentCompleted { .. } => Some(Instant::now()),
            EventPayload::LostLeadership { .. } => None,
            _ => armed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed() -> Event {
        Event::new(EventPayload::DeploymentCompleted {
            total: 1,
            succeeded: 1,
            failed: 0,
            duration: Duration::from_millis(3),
        })
    }

    fn drift_events(sub: &mut Subscription) -> usize {
        let mut count = 0;
        while let Some(event) = sub.try_recv() {
            if event.type_tag() == "drift.prevention.triggered" {
                count += 1;
            }
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_idle_interval() {
        let bus = EventBus::new();
        let monitor = DriftMonitor::new(&bus, Duration::from_millis(50));
        let mut watcher = bus.subscribe("test", 50);
        bus.start();
        let cancel = CancellationToken::new();
        tokio::spawn(monitor.run(cancel.clone()));

        bus.publish(completed());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(drift_events(&mut watcher), 1, "exactly one trigger per arm");

        // Stays quiet until the next completion.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(drift_events(&mut watcher), 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn completion_resets_the_timer() {
        let bus = EventBus::new();
        let monitor = DriftMonitor::new(&bus, Duration::from_millis(100));
        let mut watcher = bus.subscribe("test", 50);
        bus.start();
        tokio::spawn(monitor.run(CancellationToken::new()));

        bus.publish(completed());
        tokio::time::sleep(Duration::from_millis(60)).await;
        bus.publish(completed());
        tokio::time::sleep(Duration::from_millis(60)).await;
        // 120ms after the first completion, but only 60ms after the second.
        assert_eq!(drift_events(&mut watcher), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(drift_events(&mut watcher), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_leadership_disarms() {
        let bus = EventBus::new();
        let monitor = DriftMonitor::new(&bus, Duration::from_millis(50));
        let mut watcher = bus.subscribe("test", 50);
        bus.start();
        tokio::spawn(monitor.run(CancellationToken::new()));

        bus.publish(completed());
        bus.publish(Event::new(EventPayload::LostLeadership {
            identity: "replica-a".into(),
            reason: "lease transition".into(),
        }));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(drift_events(&mut watcher), 0);
    }
}
