//! Service Configuration Settings
//!
//! Configuration types for the gateway supervisor, loaded from environment
//! variables. Unparseable numeric values fall back to their defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::ports::Credentials;
use crate::application::services::{BackoffConfig, FacadeSettings};
use crate::domain::session::ProbePolicy;

/// Lowest accepted per-symbol poll interval.
pub const MIN_STREAM_INTERVAL: Duration = Duration::from_secs(1);

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port for the REST facade, WebSocket, health and metrics routes.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8000 }
    }
}

/// Gateway process and local API settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Base URL of the gateway's local REST API.
    pub base_url: String,
    /// Accept the gateway's self-signed certificate.
    pub accept_invalid_certs: bool,
    /// Program and arguments used to launch the gateway.
    pub command: Vec<String>,
    /// Working directory for the gateway process.
    pub workdir: Option<PathBuf>,
    /// Grace period between the terminate request and a forced kill.
    pub stop_grace: Duration,
    /// Start the gateway at boot when env credentials exist.
    pub autostart: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:5000/v1/api".to_string(),
            accept_invalid_certs: true,
            command: vec!["python3".to_string(), "run_ibeam.py".to_string()],
            workdir: None,
            stop_grace: Duration::from_secs(10),
            autostart: false,
        }
    }
}

/// Supervisor restart settings.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Delay before the first restart.
    pub restart_base: Duration,
    /// Maximum delay between restarts.
    pub restart_cap: Duration,
    /// Jitter fraction applied to each delay.
    pub restart_jitter: f64,
    /// Consecutive failures that put the supervisor in `FatalStopped`.
    pub max_failures: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            restart_base: Duration::from_secs(5),
            restart_cap: Duration::from_secs(60),
            restart_jitter: 0.1,
            max_failures: 8,
        }
    }
}

impl SupervisorSettings {
    /// Restart backoff. The last allowed failure goes fatal instead of
    /// scheduling another restart.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig::new(
            self.restart_base,
            self.restart_cap,
            self.max_failures.saturating_sub(1).max(1),
        )
        .with_jitter(self.restart_jitter)
    }
}

/// Health probe settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Probe period.
    pub probe_interval: Duration,
    /// Consecutive failed probes before the session is declared down.
    pub failure_threshold: u32,
    /// Failed probes tolerated while the gateway is starting.
    pub startup_budget: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(15),
            failure_threshold: 3,
            startup_budget: 8,
        }
    }
}

impl SessionSettings {
    /// Probe tolerances for the session state machine.
    #[must_use]
    pub const fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            failure_threshold: self.failure_threshold,
            startup_budget: self.startup_budget,
        }
    }
}

/// Upstream call settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Per-call timeout.
    pub timeout: Duration,
    /// Delay before the single implicit retry.
    pub retry_delay: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Market data streaming settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Minimum interval between fan-outs per symbol.
    pub min_interval: Duration,
    /// Per-connection send buffer capacity.
    pub client_buffer: usize,
    /// Gateway streaming WebSocket URL; enables push delivery.
    pub push_url: Option<String>,
    /// Keepalive period for the push feed and client pings.
    pub heartbeat: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            min_interval: MIN_STREAM_INTERVAL,
            client_buffer: 64,
            push_url: None,
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Gateway process and API settings.
    pub gateway: GatewaySettings,
    /// Restart policy.
    pub supervisor: SupervisorSettings,
    /// Health probing.
    pub session: SessionSettings,
    /// Upstream call limits.
    pub upstream: UpstreamSettings,
    /// Market data streaming.
    pub stream: StreamSettings,
    /// Credentials from `GATEWAY_USERNAME` / `GATEWAY_PASSWORD`, if set.
    pub env_credentials: Option<Credentials>,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource(lookup);
        let defaults = Self::default();

        let base_url = env
            .string("GATEWAY_BASE_URL")
            .unwrap_or(defaults.gateway.base_url);
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "GATEWAY_BASE_URL must be an http(s) URL, got {base_url}"
            )));
        }

        let command = match env.raw("GATEWAY_COMMAND") {
            Some(raw) => {
                let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
                if parts.is_empty() {
                    return Err(ConfigError::EmptyValue("GATEWAY_COMMAND".to_string()));
                }
                parts
            }
            None => defaults.gateway.command,
        };

        let env_credentials = match (env.string("GATEWAY_USERNAME"), env.string("GATEWAY_PASSWORD")) {
            (Some(username), Some(password)) => Some(Credentials::new(
                username,
                password,
                env.string("GATEWAY_ACCOUNT"),
            )),
            _ => None,
        };

        let gateway = GatewaySettings {
            base_url,
            accept_invalid_certs: env.bool(
                "GATEWAY_ACCEPT_INVALID_CERTS",
                defaults.gateway.accept_invalid_certs,
            ),
            command,
            workdir: env.string("GATEWAY_WORKDIR").map(PathBuf::from),
            stop_grace: env.secs("GATEWAY_STOP_GRACE_SECS", defaults.gateway.stop_grace),
            autostart: env.bool("GATEWAY_AUTOSTART", defaults.gateway.autostart),
        };

        if gateway.autostart && env_credentials.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "GATEWAY_USERNAME/GATEWAY_PASSWORD (required by GATEWAY_AUTOSTART)".to_string(),
            ));
        }

        let supervisor = SupervisorSettings {
            restart_base: env.secs(
                "SUPERVISOR_RESTART_BASE_SECS",
                defaults.supervisor.restart_base,
            ),
            restart_cap: env.secs(
                "SUPERVISOR_RESTART_CAP_SECS",
                defaults.supervisor.restart_cap,
            ),
            restart_jitter: env
                .parse("SUPERVISOR_RESTART_JITTER", defaults.supervisor.restart_jitter)
                .clamp(0.0, 1.0),
            max_failures: env
                .parse("SUPERVISOR_MAX_FAILURES", defaults.supervisor.max_failures)
                .max(1),
        };

        let session = SessionSettings {
            probe_interval: env.secs(
                "SESSION_PROBE_INTERVAL_SECS",
                defaults.session.probe_interval,
            ),
            failure_threshold: env
                .parse(
                    "SESSION_PROBE_FAILURE_THRESHOLD",
                    defaults.session.failure_threshold,
                )
                .max(1),
            startup_budget: env
                .parse("SESSION_STARTUP_PROBE_BUDGET", defaults.session.startup_budget)
                .max(1),
        };

        let upstream = UpstreamSettings {
            timeout: env.secs("UPSTREAM_TIMEOUT_SECS", defaults.upstream.timeout),
            retry_delay: env.millis("UPSTREAM_RETRY_DELAY_MS", defaults.upstream.retry_delay),
        };

        let stream = StreamSettings {
            min_interval: env
                .millis("STREAM_MIN_INTERVAL_MS", defaults.stream.min_interval)
                .max(MIN_STREAM_INTERVAL),
            client_buffer: env
                .parse("STREAM_CLIENT_BUFFER", defaults.stream.client_buffer)
                .max(1),
            push_url: env.string("STREAM_PUSH_URL"),
            heartbeat: env.secs("STREAM_HEARTBEAT_SECS", defaults.stream.heartbeat),
        };

        Ok(Self {
            server: ServerSettings {
                http_port: env.parse("BOOMTRADE_HTTP_PORT", defaults.server.http_port),
            },
            gateway,
            supervisor,
            session,
            upstream,
            stream,
            env_credentials,
        })
    }

    /// Facade settings derived from the upstream, supervisor and session sections.
    #[must_use]
    pub const fn facade(&self) -> FacadeSettings {
        FacadeSettings {
            upstream_timeout: self.upstream.timeout,
            retry_delay: self.upstream.retry_delay,
            restart_base: self.supervisor.restart_base,
            probe_interval: self.session.probe_interval,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

struct EnvSource<F>(F);

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn string(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.string(key)
            .map_or(default, |v| match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            })
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
