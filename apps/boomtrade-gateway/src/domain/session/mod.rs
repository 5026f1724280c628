//! Gateway Session State Machine
//!
//! Tracks readiness of the external gateway from supervisor events and
//! periodic health probes.
//!
//! # States
//!
//! ```text
//!            start            probe ok          authenticated
//!   Down ───────────► Starting ───────► AwaitingAuth ───────► Authenticated
//!    ▲                   │                  │                   │    ▲
//!    │  startup budget   │   N failures     │      probe failed │    │ probe ok
//!    ├───────────────────┘──────────────────┘                   ▼    │
//!    └────────────────────────── N failures ──────────────────  Stale
//!
//!   any ──► FatalStopped  (restart budget exhausted)
//! ```
//!
//! Process exit moves any live state to `Down`. There is no edge from
//! `Down` straight to `Authenticated`; a session always passes through
//! `Starting` and `AwaitingAuth` first.

use chrono::{DateTime, Utc};
use serde::Serialize;

// =============================================================================
// States
// =============================================================================

/// Readiness of the gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No gateway process is running.
    Down,
    /// Process spawned, gateway not yet reachable.
    Starting,
    /// Gateway reachable but not authenticated (e.g. waiting on two-factor).
    AwaitingAuth,
    /// Authenticated session with account data.
    Authenticated,
    /// Previously authenticated, last probe failed or session expired.
    Stale,
    /// Restart budget exhausted; needs external intervention.
    FatalStopped,
}

impl SessionState {
    /// All states, in lifecycle order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Down,
            Self::Starting,
            Self::AwaitingAuth,
            Self::Authenticated,
            Self::Stale,
            Self::FatalStopped,
        ]
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::Starting => "starting",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Authenticated => "authenticated",
            Self::Stale => "stale",
            Self::FatalStopped => "fatal_stopped",
        }
    }

    /// Whether requests may be forwarded upstream in this state.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Stale)
    }

    /// Whether the health prober should run in this state.
    #[must_use]
    pub const fn is_probed(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::AwaitingAuth | Self::Authenticated | Self::Stale
        )
    }

    /// Check whether `self → to` is an allowed edge.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Down, Self::Starting)
                | (Self::Starting, Self::AwaitingAuth)
                | (Self::AwaitingAuth | Self::Stale, Self::Authenticated)
                | (Self::Authenticated, Self::Stale)
                | (
                    Self::Starting | Self::AwaitingAuth | Self::Authenticated | Self::Stale,
                    Self::Down
                )
                | (Self::FatalStopped, Self::Down)
                | (
                    Self::Down
                        | Self::Starting
                        | Self::AwaitingAuth
                        | Self::Authenticated
                        | Self::Stale,
                    Self::FatalStopped
                )
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Probe Outcomes and Policy
// =============================================================================

/// Result of one health probe against the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Gateway did not answer, answered with an error, or timed out.
    Unreachable {
        /// Failure description.
        reason: String,
    },
    /// Gateway answered but the session is not authenticated.
    Unauthenticated,
    /// Gateway reports an authenticated session with account data.
    Authenticated {
        /// Primary account id.
        account_id: String,
    },
}

/// Failure tolerances for probe evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Consecutive failed probes in `AwaitingAuth` or `Stale` before `Down`.
    pub failure_threshold: u32,
    /// Failed probes tolerated while `Starting` before the start counts as failed.
    pub startup_budget: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            startup_budget: 8,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// A state change applied to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// Previous state.
    pub from: SessionState,
    /// New state.
    pub to: SessionState,
}

/// Attempted transition along an edge that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct TransitionError {
    /// Current state.
    pub from: SessionState,
    /// Requested state.
    pub to: SessionState,
}

/// Process-wide gateway session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewaySession {
    state: SessionState,
    last_health_check_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    account_id: Option<String>,
    consecutive_probe_failures: u32,
    state_since: DateTime<Utc>,
}

impl Default for GatewaySession {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewaySession {
    /// Create a session in `Down`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Down,
            last_health_check_at: None,
            last_error: None,
            account_id: None,
            consecutive_probe_failures: 0,
            state_since: Utc::now(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Time of the most recent probe.
    #[must_use]
    pub const fn last_health_check_at(&self) -> Option<DateTime<Utc>> {
        self.last_health_check_at
    }

    /// Most recent failure description.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Authenticated account id. Only present in `Authenticated`.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Consecutive failed probes in the current state.
    #[must_use]
    pub const fn consecutive_probe_failures(&self) -> u32 {
        self.consecutive_probe_failures
    }

    /// When the current state was entered.
    #[must_use]
    pub const fn state_since(&self) -> DateTime<Utc> {
        self.state_since
    }

    /// Move to `to` if the edge exists.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` for edges outside the state diagram.
    pub fn transition(&mut self, to: SessionState) -> Result<Transition, TransitionError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(TransitionError { from, to });
        }

        self.state = to;
        self.state_since = Utc::now();
        self.consecutive_probe_failures = 0;
        if to != SessionState::Authenticated {
            self.account_id = None;
        }

        Ok(Transition { from, to })
    }

    /// Record a failure description without changing state.
    pub fn set_error(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
    }

    /// Evaluate a probe outcome and apply the resulting transitions.
    ///
    /// A single evaluation may walk several edges (`Starting → AwaitingAuth →
    /// Authenticated`) but each step is a legal edge. Outcomes observed in
    /// `Down` or `FatalStopped` are ignored.
    pub fn observe(
        &mut self,
        outcome: ProbeOutcome,
        policy: &ProbePolicy,
        now: DateTime<Utc>,
    ) -> Vec<Transition> {
        if !self.state.is_probed() {
            return Vec::new();
        }

        self.last_health_check_at = Some(now);
        let mut transitions = Vec::new();

        match outcome {
            ProbeOutcome::Unreachable { reason } => {
                self.record_failure(reason, policy, &mut transitions);
            }
            ProbeOutcome::Unauthenticated => match self.state {
                SessionState::Starting => {
                    self.step(SessionState::AwaitingAuth, &mut transitions);
                }
                SessionState::AwaitingAuth => {
                    self.consecutive_probe_failures = 0;
                }
                SessionState::Authenticated | SessionState::Stale => {
                    self.record_failure(
                        "gateway session is not authenticated".to_string(),
                        policy,
                        &mut transitions,
                    );
                }
                SessionState::Down | SessionState::FatalStopped => {}
            },
            ProbeOutcome::Authenticated { account_id } => {
                if self.state == SessionState::Starting {
                    self.step(SessionState::AwaitingAuth, &mut transitions);
                }
                if self.state != SessionState::Authenticated {
                    self.step(SessionState::Authenticated, &mut transitions);
                }
                self.consecutive_probe_failures = 0;
                self.last_error = None;
                self.account_id = Some(account_id);
            }
        }

        transitions
    }

    fn record_failure(
        &mut self,
        reason: String,
        policy: &ProbePolicy,
        transitions: &mut Vec<Transition>,
    ) {
        self.last_error = Some(reason);

        match self.state {
            SessionState::Authenticated => {
                self.step(SessionState::Stale, transitions);
                self.consecutive_probe_failures = 1;
                if self.consecutive_probe_failures >= policy.failure_threshold {
                    self.step(SessionState::Down, transitions);
                }
            }
            SessionState::Starting => {
                self.consecutive_probe_failures += 1;
                if self.consecutive_probe_failures >= policy.startup_budget {
                    self.step(SessionState::Down, transitions);
                }
            }
            SessionState::AwaitingAuth | SessionState::Stale => {
                self.consecutive_probe_failures += 1;
                if self.consecutive_probe_failures >= policy.failure_threshold {
                    self.step(SessionState::Down, transitions);
                }
            }
            SessionState::Down | SessionState::FatalStopped => {}
        }
    }

    fn step(&mut self, to: SessionState, transitions: &mut Vec<Transition>) {
        if let Ok(transition) = self.transition(to) {
            transitions.push(transition);
        }
    }
}
