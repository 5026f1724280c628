//! Supervisor restart behaviour with a scripted launcher.
//!
//! Runs on a paused clock so backoff delays are exact.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boomtrade_gateway::infrastructure::credentials::{EnvCredentialStore, MemoryCredentialStore};
use boomtrade_gateway::{
    BackoffConfig, CredentialStore, Credentials, GatewayControl, GatewayLauncher, GatewayProcess,
    ProbeOutcome, ProbePolicy, ProcessExit, ProcessSupervisor, SessionHandle, SessionState,
    SupervisorError, SupervisorOptions,
};
use parking_lot::Mutex;
use tokio::time::Instant;

// =============================================================================
// Scripted launcher
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Launch {
    /// Spawning fails.
    SpawnFails,
    /// Process runs, then exits with code 1.
    CrashAfter(Duration),
    /// Process runs until terminated.
    Healthy,
}

struct FakeProcess {
    exit_at: Option<Instant>,
}

#[async_trait]
impl GatewayProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> ProcessExit {
        match self.exit_at {
            Some(at) => {
                tokio::time::sleep_until(at).await;
                ProcessExit { code: Some(1) }
            }
            None => std::future::pending().await,
        }
    }

    async fn terminate(&mut self, _grace: Duration) -> ProcessExit {
        ProcessExit { code: Some(0) }
    }
}

struct ScriptedLauncher {
    script: Mutex<VecDeque<Launch>>,
    fallback: Launch,
    launches: Mutex<Vec<Instant>>,
}

impl ScriptedLauncher {
    fn new(script: impl IntoIterator<Item = Launch>, fallback: Launch) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            launches: Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.launches.lock().len()
    }

    fn gaps_secs(&self) -> Vec<u64> {
        self.launches
            .lock()
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect()
    }
}

#[async_trait]
impl GatewayLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        _credentials: &Credentials,
    ) -> Result<Box<dyn GatewayProcess>, SupervisorError> {
        self.launches.lock().push(Instant::now());
        let step = self.script.lock().pop_front().unwrap_or(self.fallback);
        match step {
            Launch::SpawnFails => Err(SupervisorError::Spawn("no such file".to_string())),
            Launch::CrashAfter(after) => Ok(Box::new(FakeProcess {
                exit_at: Some(Instant::now() + after),
            })),
            Launch::Healthy => Ok(Box::new(FakeProcess { exit_at: None })),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn creds() -> Credentials {
    Credentials::new("trader".into(), "secret".into(), None)
}

fn options() -> SupervisorOptions {
    SupervisorOptions {
        backoff: BackoffConfig::new(Duration::from_secs(5), Duration::from_secs(60), 7)
            .with_jitter(0.0),
        max_failures: 8,
        stop_grace: Duration::from_secs(1),
    }
}

fn supervisor(
    launcher: Arc<ScriptedLauncher>,
    store: Arc<dyn CredentialStore>,
) -> (ProcessSupervisor, Arc<SessionHandle>) {
    let session = Arc::new(SessionHandle::new(ProbePolicy::default()));
    let (supervisor, _task) = ProcessSupervisor::spawn(launcher, store, Arc::clone(&session), options());
    (supervisor, session)
}

fn env_store() -> Arc<dyn CredentialStore> {
    Arc::new(EnvCredentialStore::new(Some(creds())))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn backoff_doubles_to_cap_then_goes_fatal() {
    let launcher = ScriptedLauncher::new([], Launch::SpawnFails);
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());

    let result = supervisor.start(None).await;
    assert!(matches!(result, Err(SupervisorError::Spawn(_))));
    assert_eq!(session.state(), SessionState::Down);
    assert!(supervisor.status().next_restart_at.is_some());

    tokio::time::sleep(Duration::from_secs(400)).await;

    assert_eq!(launcher.count(), 8);
    assert_eq!(launcher.gaps_secs(), vec![5, 10, 20, 40, 60, 60, 60]);
    assert_eq!(session.state(), SessionState::FatalStopped);

    let status = supervisor.status();
    assert!(status.fatal);
    assert!(!status.running);
    assert_eq!(status.consecutive_failures, 8);
    assert!(status.next_restart_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn crashes_count_as_failures() {
    let launcher = ScriptedLauncher::new([], Launch::CrashAfter(Duration::from_secs(2)));
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());

    supervisor.start(None).await.unwrap();
    assert_eq!(session.state(), SessionState::Starting);
    assert!(supervisor.status().running);

    // crash at 2s, restart at 7s, crash at 9s
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(launcher.count(), 2);
    assert_eq!(supervisor.status().consecutive_failures, 2);
    assert_eq!(session.state(), SessionState::Down);
}

#[tokio::test(start_paused = true)]
async fn fatal_stop_stays_put_until_explicit_start() {
    let launcher = ScriptedLauncher::new(
        std::iter::repeat_n(Launch::SpawnFails, 8),
        Launch::Healthy,
    );
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());

    let _ = supervisor.start(None).await;
    tokio::time::sleep(Duration::from_secs(400)).await;
    assert_eq!(session.state(), SessionState::FatalStopped);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(launcher.count(), 8);

    let status = supervisor.start(None).await.unwrap();
    assert_eq!(launcher.count(), 9);
    assert!(status.running);
    assert!(!status.fatal);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(session.state(), SessionState::Starting);
}

#[tokio::test(start_paused = true)]
async fn authentication_clears_failure_count() {
    let launcher = ScriptedLauncher::new([Launch::SpawnFails, Launch::SpawnFails], Launch::Healthy);
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());

    let _ = supervisor.start(None).await;
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(launcher.count(), 3);
    assert_eq!(supervisor.status().consecutive_failures, 2);
    assert_eq!(session.state(), SessionState::Starting);

    session.observe(ProbeOutcome::Authenticated {
        account_id: "DU123".to_string(),
    });
    settle().await;

    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(supervisor.status().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_while_running() {
    let launcher = ScriptedLauncher::new([], Launch::Healthy);
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());

    supervisor.start(None).await.unwrap();
    supervisor.start(None).await.unwrap();
    session.observe(ProbeOutcome::Unauthenticated);
    assert_eq!(session.state(), SessionState::AwaitingAuth);
    supervisor.start(None).await.unwrap();

    assert_eq!(launcher.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_restart() {
    let launcher = ScriptedLauncher::new([Launch::SpawnFails], Launch::Healthy);
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());

    let _ = supervisor.start(None).await;
    assert!(supervisor.status().next_restart_at.is_some());

    let status = supervisor.stop().await.unwrap();
    assert!(status.next_restart_at.is_none());
    assert_eq!(status.consecutive_failures, 0);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(launcher.count(), 1);
    assert_eq!(session.state(), SessionState::Down);
}

#[tokio::test(start_paused = true)]
async fn stop_terminates_running_gateway() {
    let launcher = ScriptedLauncher::new([], Launch::Healthy);
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());

    supervisor.start(None).await.unwrap();
    let status = supervisor.stop().await.unwrap();

    assert!(!status.running);
    assert_eq!(session.state(), SessionState::Down);
}

#[tokio::test(start_paused = true)]
async fn explicit_start_preempts_scheduled_restart() {
    let launcher = ScriptedLauncher::new([Launch::SpawnFails], Launch::Healthy);
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());

    let _ = supervisor.start(None).await;
    let status = supervisor.start(None).await.unwrap();

    assert_eq!(launcher.count(), 2);
    assert!(status.running);
    assert!(status.next_restart_at.is_none());
    assert_eq!(session.state(), SessionState::Starting);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(launcher.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_credentials_are_reported() {
    let launcher = ScriptedLauncher::new([], Launch::Healthy);
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
    let (supervisor, session) = supervisor(Arc::clone(&launcher), store);

    assert_eq!(
        supervisor.start(None).await.err(),
        Some(SupervisorError::CredentialsMissing)
    );
    assert_eq!(launcher.count(), 0);
    assert_eq!(session.state(), SessionState::Down);
}

#[tokio::test(start_paused = true)]
async fn supplied_credentials_are_remembered_for_restarts() {
    let launcher = ScriptedLauncher::new([], Launch::CrashAfter(Duration::from_secs(1)));
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
    let (supervisor, _session) = supervisor(Arc::clone(&launcher), Arc::clone(&store));

    supervisor.start(Some(creds())).await.unwrap();
    assert_eq!(store.get_credentials().unwrap(), creds());

    // crash at 1s, restart at 6s with the remembered credentials
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(launcher.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_does_not_clear_fatal_stop() {
    let launcher = ScriptedLauncher::new([], Launch::SpawnFails);
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());

    let _ = supervisor.start(None).await;
    tokio::time::sleep(Duration::from_secs(400)).await;
    assert_eq!(session.state(), SessionState::FatalStopped);

    let status = supervisor.stop().await.unwrap();
    assert!(status.fatal);
    assert_eq!(status.consecutive_failures, 8);
    assert_eq!(session.state(), SessionState::FatalStopped);
}

async fn authenticated_then_down(supervisor: &ProcessSupervisor, session: &SessionHandle) {
    supervisor.start(None).await.unwrap();
    session.observe(ProbeOutcome::Authenticated {
        account_id: "DU123".to_string(),
    });
    settle().await;
    for _ in 0..3 {
        session.observe(ProbeOutcome::Unreachable {
            reason: "connection refused".to_string(),
        });
    }
    assert_eq!(session.state(), SessionState::Down);
}

#[tokio::test(start_paused = true)]
async fn probe_declared_down_recycles_gateway() {
    let launcher = ScriptedLauncher::new([], Launch::Healthy);
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());
    authenticated_then_down(&supervisor, &session).await;

    supervisor.request_restart("health probes failed").await;
    settle().await;

    let status = supervisor.status();
    assert!(!status.running);
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.next_restart_at.is_some());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(launcher.count(), 2);
    assert_eq!(launcher.gaps_secs(), vec![5]);
    assert_eq!(session.state(), SessionState::Starting);
}

#[tokio::test(start_paused = true)]
async fn repeated_restart_request_is_ignored_while_scheduled() {
    let launcher = ScriptedLauncher::new([], Launch::Healthy);
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());
    authenticated_then_down(&supervisor, &session).await;

    supervisor.request_restart("health probes failed").await;
    settle().await;
    supervisor.request_restart("health probes failed").await;
    settle().await;
    assert_eq!(supervisor.status().consecutive_failures, 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(launcher.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn restart_request_ignored_while_session_live() {
    let launcher = ScriptedLauncher::new([], Launch::Healthy);
    let (supervisor, session) = supervisor(Arc::clone(&launcher), env_store());

    supervisor.start(None).await.unwrap();
    session.observe(ProbeOutcome::Unauthenticated);
    supervisor.request_restart("stale report").await;
    settle().await;

    let status = supervisor.status();
    assert!(status.running);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(launcher.count(), 1);
    assert_eq!(session.state(), SessionState::AwaitingAuth);
}
