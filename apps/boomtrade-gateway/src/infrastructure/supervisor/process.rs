//! Gateway process launcher on `tokio::process`.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::application::ports::{
    Credentials, GatewayLauncher, GatewayProcess, ProcessExit, SupervisorError,
};

/// Launches the gateway as a child process with credentials in its environment.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
}

impl CommandLauncher {
    /// Create a launcher from a program-plus-arguments list.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Spawn` if the command is empty.
    pub fn new(command: &[String], workdir: Option<PathBuf>) -> Result<Self, SupervisorError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SupervisorError::Spawn("gateway command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir,
        })
    }
}

#[async_trait]
impl GatewayLauncher for CommandLauncher {
    async fn launch(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn GatewayProcess>, SupervisorError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("IBEAM_ACCOUNT", credentials.username())
            .env("IBEAM_PASSWORD", credentials.password())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| SupervisorError::Spawn(format!("{}: {e}", self.program)))?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr"));
        }

        tracing::info!(program = %self.program, pid, "Gateway process spawned");
        Ok(Box::new(ChildProcess { child, pid }))
    }
}

struct ChildProcess {
    child: Child,
    pid: Option<u32>,
}

#[async_trait]
impl GatewayProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> ProcessExit {
        match self.child.wait().await {
            Ok(status) => exit_of(status),
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "Failed to wait on gateway process");
                ProcessExit { code: None }
            }
        }
    }

    async fn terminate(&mut self, grace: Duration) -> ProcessExit {
        if let Ok(Some(status)) = self.child.try_wait() {
            return exit_of(status);
        }

        request_terminate(self.pid);

        if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
            return exit_of(status);
        }

        tracing::warn!(pid = self.pid, ?grace, "Gateway did not exit within grace period, killing");
        if let Err(e) = self.child.kill().await {
            tracing::warn!(pid = self.pid, error = %e, "Failed to kill gateway process");
        }
        self.wait().await
    }
}

fn exit_of(status: ExitStatus) -> ProcessExit {
    ProcessExit {
        code: status.code(),
    }
}

#[cfg(unix)]
fn request_terminate(pid: Option<u32>) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::warn!(pid, error = %e, "Failed to send SIGTERM to gateway");
    }
}

#[cfg(not(unix))]
const fn request_terminate(_pid: Option<u32>) {}

async fn forward_lines<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "boomtrade_gateway::gateway_process", stream, "{line}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn launcher(script: &str) -> CommandLauncher {
        CommandLauncher::new(
            &["sh".to_string(), "-c".to_string(), script.to_string()],
            None,
        )
        .unwrap()
    }

    fn credentials() -> Credentials {
        Credentials::new("trader".to_string(), "secret".to_string(), None)
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            CommandLauncher::new(&[], None),
            Err(SupervisorError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn exit_code_is_reported() {
        let mut process = launcher("exit 3").launch(&credentials()).await.unwrap();
        assert!(process.pid().is_some());
        assert_eq!(process.wait().await, ProcessExit { code: Some(3) });
    }

    #[tokio::test]
    async fn credentials_are_injected() {
        let mut process = launcher(r#"test "$IBEAM_ACCOUNT" = trader && test "$IBEAM_PASSWORD" = secret"#)
            .launch(&credentials())
            .await
            .unwrap();
        assert!(process.wait().await.success());
    }

    #[tokio::test]
    async fn terminate_stops_long_running_process() {
        let mut process = launcher("sleep 30").launch(&credentials()).await.unwrap();
        let exit = process.terminate(Duration::from_secs(2)).await;
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn terminate_delivers_sigterm_before_grace_expires() {
        let mut process = launcher(r#"trap 'exit 42' TERM; while :; do sleep 0.1; done"#)
            .launch(&credentials())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let exit = process.terminate(Duration::from_secs(20)).await;

        assert_eq!(exit.code, Some(42));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn exit_code_maps_from_status() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_of(ExitStatus::from_raw(3 << 8)).code, Some(3));
        assert_eq!(exit_of(ExitStatus::from_raw(9)).code, None);
    }

    #[tokio::test]
    async fn runs_in_configured_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run_gateway.sh"), "exit 7\n").unwrap();
        let launcher = CommandLauncher::new(
            &["sh".to_string(), "run_gateway.sh".to_string()],
            Some(dir.path().to_path_buf()),
        )
        .unwrap();

        let mut process = tokio_test::assert_ok!(launcher.launch(&credentials()).await);
        assert_eq!(process.wait().await.code, Some(7));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let launcher = CommandLauncher::new(
            &["/nonexistent/boomtrade-gateway-binary".to_string()],
            None,
        )
        .unwrap();
        assert!(matches!(
            launcher.launch(&credentials()).await,
            Err(SupervisorError::Spawn(_))
        ));
    }
}
