//! Process Supervisor
//!
//! Owns the gateway child process. A single actor task serializes start,
//! stop and restart requests, watches the child for exits, and schedules
//! restarts with the shared backoff policy. The `N`th consecutive failure
//! puts the session in `FatalStopped`; only an explicit start leaves it.
//!
//! The failure count resets whenever the session reaches `Authenticated`.

mod process;

pub use process::CommandLauncher;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::application::ports::{
    CredentialStore, Credentials, GatewayControl, GatewayLauncher, GatewayProcess, ProcessExit,
    SupervisorError, SupervisorStatus,
};
use crate::application::services::{BackoffConfig, BackoffPolicy, SessionHandle};
use crate::domain::session::{SessionState, Transition};
use crate::infrastructure::metrics;

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Restart backoff.
    pub backoff: BackoffConfig,
    /// Consecutive failures that end in `FatalStopped`.
    pub max_failures: u32,
    /// Grace period before a stopping gateway is killed.
    pub stop_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::new(Duration::from_secs(5), Duration::from_secs(60), 7),
            max_failures: 8,
            stop_grace: Duration::from_secs(10),
        }
    }
}

enum Command {
    Start {
        credentials: Option<Credentials>,
        reply: oneshot::Sender<Result<SupervisorStatus, SupervisorError>>,
    },
    Stop {
        reply: oneshot::Sender<SupervisorStatus>,
    },
    Restart {
        reason: String,
    },
}

/// Handle to the supervisor actor.
#[derive(Clone)]
pub struct ProcessSupervisor {
    commands: mpsc::Sender<Command>,
    status: Arc<RwLock<SupervisorStatus>>,
}

impl ProcessSupervisor {
    /// Spawn the supervisor actor.
    ///
    /// The actor stops, terminating any child, once every handle is dropped.
    #[must_use]
    pub fn spawn(
        launcher: Arc<dyn GatewayLauncher>,
        credentials: Arc<dyn CredentialStore>,
        session: Arc<SessionHandle>,
        options: SupervisorOptions,
    ) -> (Self, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let status = Arc::new(RwLock::new(SupervisorStatus::default()));

        let actor = SupervisorActor {
            launcher,
            credentials,
            session_rx: session.subscribe(),
            session,
            policy: BackoffPolicy::new(options.backoff.clone()),
            options,
            failures: 0,
            child: None,
            restart_at: None,
            status: Arc::clone(&status),
            commands: commands_rx,
        };
        let handle = tokio::spawn(actor.run());

        (
            Self {
                commands: commands_tx,
                status,
            },
            handle,
        )
    }

    /// Ask for a restart after the session was declared down by probing.
    pub async fn request_restart(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.commands.send(Command::Restart { reason }).await.is_err() {
            tracing::debug!("Supervisor gone, restart request dropped");
        }
    }
}

#[async_trait]
impl GatewayControl for ProcessSupervisor {
    async fn start(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<SupervisorStatus, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start { credentials, reply })
            .await
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    async fn stop(&self) -> Result<SupervisorStatus, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply })
            .await
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }

    fn status(&self) -> SupervisorStatus {
        self.status.read().clone()
    }
}

// =============================================================================
// Actor
// =============================================================================

struct SupervisorActor {
    launcher: Arc<dyn GatewayLauncher>,
    credentials: Arc<dyn CredentialStore>,
    session: Arc<SessionHandle>,
    session_rx: watch::Receiver<SessionState>,
    policy: BackoffPolicy,
    options: SupervisorOptions,
    failures: u32,
    child: Option<Box<dyn GatewayProcess>>,
    restart_at: Option<(Instant, DateTime<Utc>)>,
    status: Arc<RwLock<SupervisorStatus>>,
    commands: mpsc::Receiver<Command>,
}

impl SupervisorActor {
    async fn run(mut self) {
        tracing::info!(max_failures = self.options.max_failures, "Supervisor started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command).await;
                }
                exit = wait_child(&mut self.child) => {
                    self.child = None;
                    tracing::warn!(code = ?exit.code, "Gateway process exited unexpectedly");
                    self.fail(&format!("gateway exited with code {:?}", exit.code));
                }
                () = sleep_until_opt(self.restart_at.map(|(at, _)| at)) => {
                    self.restart_at = None;
                    tracing::info!(attempt = self.failures + 1, "Restarting gateway");
                    if self.launch().await == Err(SupervisorError::CredentialsMissing) {
                        self.fail("gateway credentials are missing");
                    }
                }
                changed = self.session_rx.changed() => {
                    if changed.is_ok() && *self.session_rx.borrow_and_update() == SessionState::Authenticated {
                        self.on_authenticated();
                    }
                }
            }
        }

        if let Some(mut child) = self.child.take() {
            child.terminate(self.options.stop_grace).await;
        }
        tracing::info!("Supervisor stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start { credentials, reply } => {
                let result = self.start(credentials).await;
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(self.snapshot());
            }
            Command::Restart { reason } => self.restart(&reason).await,
        }
    }

    async fn start(
        &mut self,
        credentials: Option<Credentials>,
    ) -> Result<SupervisorStatus, SupervisorError> {
        if let Some(credentials) = credentials {
            self.credentials.remember(credentials);
        }

        match self.session.state() {
            SessionState::Starting
            | SessionState::AwaitingAuth
            | SessionState::Authenticated
            | SessionState::Stale => {
                tracing::debug!("Gateway already running, start is a no-op");
                return Ok(self.snapshot());
            }
            SessionState::FatalStopped => {
                tracing::info!("Explicit start after fatal stop, resetting restart budget");
                record(self.session.reset_after_fatal());
                self.reset_budget();
            }
            SessionState::Down => {}
        }

        if let Some(mut child) = self.child.take() {
            child.terminate(self.options.stop_grace).await;
        }
        self.restart_at = None;

        self.launch().await?;
        Ok(self.snapshot())
    }

    async fn stop(&mut self) {
        self.restart_at = None;
        if let Some(mut child) = self.child.take() {
            tracing::info!(pid = child.pid(), "Stopping gateway");
            let exit = child.terminate(self.options.stop_grace).await;
            tracing::info!(code = ?exit.code, "Gateway stopped");
        }
        if self.session.state() == SessionState::FatalStopped {
            self.publish();
            return;
        }
        record(self.session.mark_down("stopped by request"));
        self.reset_budget();
    }

    async fn restart(&mut self, reason: &str) {
        if self.session.state() != SessionState::Down || self.restart_at.is_some() {
            return;
        }
        if let Some(mut child) = self.child.take() {
            tracing::warn!(pid = child.pid(), reason, "Session down, recycling gateway");
            child.terminate(self.options.stop_grace).await;
        }
        self.fail(reason);
    }

    async fn launch(&mut self) -> Result<(), SupervisorError> {
        let credentials = self.credentials.get_credentials().map_err(|_| {
            tracing::warn!("No gateway credentials available");
            SupervisorError::CredentialsMissing
        })?;

        if let Ok(transition) = self.session.mark_starting() {
            record(Some(transition));
        }

        match self.launcher.launch(&credentials).await {
            Ok(child) => {
                tracing::info!(pid = child.pid(), "Gateway launched");
                self.child = Some(child);
                self.publish();
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Gateway launch failed");
                self.fail(&e.to_string());
                Err(e)
            }
        }
    }

    /// Count a failure and either schedule a restart or stop for good.
    fn fail(&mut self, reason: &str) {
        self.failures += 1;
        metrics::set_consecutive_failures(self.failures);
        record(self.session.mark_down(reason));

        let delay = if self.failures >= self.options.max_failures {
            None
        } else {
            self.policy.next_delay()
        };

        if let Some(delay) = delay {
            let wall = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            self.restart_at = Some((Instant::now() + delay, wall));
            metrics::record_supervisor_restart();
            tracing::info!(
                attempt = self.failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Gateway restart scheduled"
            );
        } else {
            self.restart_at = None;
            tracing::error!(
                failures = self.failures,
                reason,
                "Gateway restart budget exhausted, entering FatalStopped"
            );
            record(self.session.mark_fatal(reason));
        }

        self.publish();
    }

    fn on_authenticated(&mut self) {
        if self.failures > 0 {
            tracing::info!(failures = self.failures, "Session authenticated, clearing failure count");
        }
        self.reset_budget();
    }

    fn reset_budget(&mut self) {
        self.failures = 0;
        self.policy.reset();
        metrics::set_consecutive_failures(0);
        self.publish();
    }

    fn snapshot(&self) -> SupervisorStatus {
        SupervisorStatus {
            running: self.child.is_some(),
            pid: self.child.as_ref().and_then(|c| c.pid()),
            consecutive_failures: self.failures,
            next_restart_at: self.restart_at.map(|(_, wall)| wall),
            fatal: self.session.state() == SessionState::FatalStopped,
        }
    }

    fn publish(&self) {
        *self.status.write() = self.snapshot();
    }
}

fn record(transition: Option<Transition>) {
    if let Some(transition) = transition {
        metrics::record_session_transitions(&[transition]);
    }
}

async fn wait_child(child: &mut Option<Box<dyn GatewayProcess>>) -> ProcessExit {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
