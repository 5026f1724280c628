//! Shared session handle.
//!
//! Single writer point for the process-wide `GatewaySession`. Every
//! mutation goes through the write lock and publishes the resulting state
//! on a watch channel so workers can wait for readiness without polling.

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::domain::session::{
    GatewaySession, ProbeOutcome, ProbePolicy, SessionState, Transition, TransitionError,
};

/// Thread-safe owner of the gateway session.
#[derive(Debug)]
pub struct SessionHandle {
    inner: RwLock<GatewaySession>,
    state_tx: watch::Sender<SessionState>,
    policy: ProbePolicy,
}

impl SessionHandle {
    /// Create a handle with the session in `Down`.
    #[must_use]
    pub fn new(policy: ProbePolicy) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Down);
        Self {
            inner: RwLock::new(GatewaySession::new()),
            state_tx,
            policy,
        }
    }

    /// Clone of the current session record.
    #[must_use]
    pub fn snapshot(&self) -> GatewaySession {
        self.inner.read().clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.read().state()
    }

    /// Authenticated account id, if any.
    #[must_use]
    pub fn account_id(&self) -> Option<String> {
        self.inner.read().account_id().map(str::to_string)
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Probe tolerances in effect.
    #[must_use]
    pub const fn policy(&self) -> &ProbePolicy {
        &self.policy
    }

    /// Apply a probe outcome.
    pub fn observe(&self, outcome: ProbeOutcome) -> Vec<Transition> {
        let mut session = self.inner.write();
        let transitions = session.observe(outcome, &self.policy, Utc::now());
        self.publish(&session, &transitions);
        transitions
    }

    /// `Down → Starting`, on supervisor start.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless the session is `Down`.
    pub fn mark_starting(&self) -> Result<Transition, TransitionError> {
        self.apply(SessionState::Starting, None)
    }

    /// Move to `Down` from any live state. No-op if already down or fatal;
    /// only `reset_after_fatal` leaves `FatalStopped`.
    pub fn mark_down(&self, reason: &str) -> Option<Transition> {
        let mut session = self.inner.write();
        if session.state() == SessionState::FatalStopped {
            return None;
        }
        session.set_error(reason);
        let transition = session.transition(SessionState::Down).ok()?;
        self.publish(&session, std::slice::from_ref(&transition));
        Some(transition)
    }

    /// Move to `FatalStopped` after the restart budget is spent.
    pub fn mark_fatal(&self, reason: &str) -> Option<Transition> {
        self.apply(SessionState::FatalStopped, Some(reason)).ok()
    }

    /// `FatalStopped → Down`, on explicit operator intervention.
    pub fn reset_after_fatal(&self) -> Option<Transition> {
        self.apply(SessionState::Down, None).ok()
    }

    fn apply(
        &self,
        to: SessionState,
        reason: Option<&str>,
    ) -> Result<Transition, TransitionError> {
        let mut session = self.inner.write();
        if let Some(reason) = reason {
            session.set_error(reason);
        }
        let transition = session.transition(to)?;
        self.publish(&session, std::slice::from_ref(&transition));
        Ok(transition)
    }

    fn publish(&self, session: &GatewaySession, transitions: &[Transition]) {
        for transition in transitions {
            tracing::info!(
                from = %transition.from,
                to = %transition.to,
                account_id = session.account_id().unwrap_or("-"),
                last_error = session.last_error().unwrap_or("-"),
                "Session state changed"
            );
        }
        if !transitions.is_empty() {
            self.state_tx.send_replace(session.state());
        }
    }
}
