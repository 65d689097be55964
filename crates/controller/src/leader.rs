//! Leader election adapter: lease transitions in, events and hooks out.
//!
//! The lease primitive itself is external; it surfaces here as a
//! `watch::Receiver<LeaseState>`. The adapter publishes the leadership
//! events and drives the hooks that own the leader-only cancellation scope
//! (scheduler, deployer, drift monitor, webhook configuration management).
//! Followers keep rendering and validating as warm standby, they just never
//! hold the write path.

use haptic_bus::EventBus;
use haptic_events::{Event, EventPayload};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// What the external lease primitive reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState {
    /// Not holding the lease; the current holder if known.
    Follower { leader: Option<String> },
    Leader,
}

/// Lifecycle callbacks for the leader-only component scope.
pub trait LeaderHooks: Send {
    fn start_leading(&mut self);
    fn stop_leading(&mut self);
}

pub struct LeaderElectionAdapter {
    bus: EventBus,
    identity: String,
    lease_name: String,
    lease_namespace: String,
    lease: watch::Receiver<LeaseState>,
    hooks: Box<dyn LeaderHooks>,
}

impl LeaderElectionAdapter {
    pub fn new(
        bus: &EventBus,
        identity: impl Into<String>,
        lease_name: impl Into<String>,
        lease_namespace: impl Into<String>,
        lease: watch::Receiver<LeaseState>,
        hooks: Box<dyn LeaderHooks>,
    ) -> Self {
        Self {
            bus: bus.clone(),
            identity: identity.into(),
            lease_name: lease_name.into(),
            lease_namespace: lease_namespace.into(),
            lease,
            hooks,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        self.bus.publish(Event::new(EventPayload::LeaderElectionStarted {
            identity: self.identity.clone(),
            lease_name: self.lease_name.clone(),
            lease_namespace: self.lease_namespace.clone(),
        }));

        let mut is_leader = false;
        let mut observed: Option<String> = None;
        loop {
            let state = self.lease.borrow_and_update().clone();
            self.transition(&mut is_leader, &mut observed, state);
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = self.lease.changed() => {
                    // The elector task went away; treat it as shutdown.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        if is_leader {
            self.hooks.stop_leading();
        }
        tracing::debug!("leader election adapter stopped");
    }

    fn transition(
        &mut self,
        is_leader: &mut bool,
        observed: &mut Option<String>,
        state: LeaseState,
    ) {
        match state {
            LeaseState::Leader => {
                if !*is_leader {
                    *is_leader = true;
                    tracing::info!(identity = %self.identity, "became leader");
                    self.bus.publish(Event::new(EventPayload::BecameLeader {
                        identity: self.identity.clone(),
                    }));
                    self.observe(observed, self.identity.clone());
                    self.hooks.start_leading();
                }
            }
            LeaseState::Follower { leader } => {
                if *is_leader {
                    *is_leader = false;
                    tracing::warn!(identity = %self.identity, "lost leadership");
                    self.bus.publish(Event::new(EventPayload::LostLeadership {
                        identity: self.identity.clone(),
                        reason: "lease transition".to_owned(),
                    }));
                    self.hooks.stop_leading();
                }
                if let Some(leader) = leader {
                    self.observe(observed, leader);
                }
            }
        }
    }

    fn observe(&self, observed: &mut Option<String>, leader: String) {
        if observed.as_deref() == Some(leader.as_str()) {
            return;
        }
        let is_self = leader == self.identity;
        tracing::info!(leader = %leader, is_self, "new leader observed");
        self.bus.publish(Event::new(EventPayload::NewLeaderObserved {
            identity: leader.clone(),
            is_self,
        }));
        *observed = Some(leader);
    }
}
