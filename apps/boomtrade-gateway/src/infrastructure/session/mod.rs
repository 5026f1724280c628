//! Session Health Monitor
//!
//! Probes the gateway on a fixed interval, independent of request traffic,
//! and feeds the outcomes into the session state machine. When probing
//! drives the session to `Down` the monitor asks for a restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::GatewayApi;
use crate::application::services::SessionHandle;
use crate::domain::session::{ProbeOutcome, SessionState};
use crate::infrastructure::metrics;

/// Configuration for probing.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between probes.
    pub probe_interval: Duration,
    /// Deadline for a single probe.
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Events emitted by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Probing declared the session down; the gateway should be recycled.
    RestartRequested {
        /// Last probe failure.
        reason: String,
    },
}

/// Periodic gateway prober.
pub struct HealthMonitor {
    config: MonitorConfig,
    gateway: Arc<dyn GatewayApi>,
    session: Arc<SessionHandle>,
    event_tx: mpsc::Sender<MonitorEvent>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    /// Create a new monitor.
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        gateway: Arc<dyn GatewayApi>,
        session: Arc<SessionHandle>,
        event_tx: mpsc::Sender<MonitorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            gateway,
            session,
            event_tx,
            cancel,
        }
    }

    /// Run the probing loop until cancelled.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.probe_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Health monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.session.state().is_probed() {
                        self.probe_once().await;
                    }
                }
            }
        }
    }

    /// Run one probe and apply its outcome.
    pub async fn probe_once(&self) {
        let outcome = tokio::time::timeout(self.config.probe_timeout, self.gateway.probe())
            .await
            .unwrap_or_else(|_| ProbeOutcome::Unreachable {
                reason: "probe timed out".to_string(),
            });

        match &outcome {
            ProbeOutcome::Unreachable { reason } => {
                tracing::warn!(state = %self.session.state(), reason, "Gateway probe failed");
            }
            ProbeOutcome::Unauthenticated => {
                tracing::debug!(state = %self.session.state(), "Gateway reachable, not authenticated");
            }
            ProbeOutcome::Authenticated { account_id } => {
                tracing::debug!(account_id, "Gateway session authenticated");
            }
        }

        let transitions = self.session.observe(outcome);
        metrics::record_session_transitions(&transitions);

        if transitions.last().is_some_and(|t| t.to == SessionState::Down) {
            let reason = self
                .session
                .snapshot()
                .last_error()
                .unwrap_or("health probes failed")
                .to_string();
            if self
                .event_tx
                .send(MonitorEvent::RestartRequested { reason })
                .await
                .is_err()
            {
                tracing::debug!("Monitor event receiver dropped");
            }
        }
    }
}
