//! BoomTrade Gateway Binary
//!
//! Starts the gateway supervisor, REST facade and market data stream.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin boomtrade-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `BOOMTRADE_HTTP_PORT`: REST/WebSocket/health port (default: 8000)
//! - `GATEWAY_BASE_URL`: Gateway local API (default: <https://localhost:5000/v1/api>)
//! - `GATEWAY_COMMAND`: Gateway launch command (default: `python3 run_ibeam.py`)
//! - `GATEWAY_USERNAME` / `GATEWAY_PASSWORD` / `GATEWAY_ACCOUNT`: Env credentials
//! - `GATEWAY_AUTOSTART`: Start the gateway at boot (default: false)
//! - `STREAM_PUSH_URL`: Gateway streaming WebSocket; enables push delivery
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: boomtrade-gateway)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use boomtrade_gateway::infrastructure::credentials::{EnvCredentialStore, MemoryCredentialStore};
use boomtrade_gateway::infrastructure::gateway::{
    GatewayClient, GatewayClientConfig, GatewayQuoteSource, PushFeed, PushFeedConfig,
};
use boomtrade_gateway::infrastructure::lifecycle::ShutdownSequence;
use boomtrade_gateway::infrastructure::session::{HealthMonitor, MonitorConfig, MonitorEvent};
use boomtrade_gateway::infrastructure::telemetry;
use boomtrade_gateway::{
    ApiServer, ApiServerError, AppConfig, AppState, CommandLauncher, CredentialStore, Facade,
    GatewayApi, GatewayControl, HubConfig, ProcessSupervisor, SessionHandle, StreamHub,
    SupervisorOptions, init_metrics,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting BoomTrade gateway");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = AppConfig::from_env()?;
    log_config(&config);

    let server_token = CancellationToken::new();
    let background_token = CancellationToken::new();

    // Credentials: runtime-supplied first, env as fallback
    let env_store: Arc<dyn CredentialStore> =
        Arc::new(EnvCredentialStore::new(config.env_credentials.clone()));
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(MemoryCredentialStore::with_fallback(env_store));

    let session = Arc::new(SessionHandle::new(config.session.probe_policy()));

    // Gateway local API client
    let client = Arc::new(GatewayClient::new(&GatewayClientConfig {
        base_url: config.gateway.base_url.clone(),
        timeout: config.upstream.timeout,
        accept_invalid_certs: config.gateway.accept_invalid_certs,
    })?);

    // Optional push feed
    let push = config.stream.push_url.clone().map(|url| {
        let mut push_config = PushFeedConfig::new(url);
        push_config.heartbeat = config.stream.heartbeat;
        push_config.accept_invalid_certs = config.gateway.accept_invalid_certs;
        let (handle, _task) =
            PushFeed::spawn(push_config, Arc::clone(&client), background_token.clone());
        handle
    });
    let quotes = Arc::new(GatewayQuoteSource::new(Arc::clone(&client), push));

    // Process supervisor
    let launcher = Arc::new(CommandLauncher::new(
        &config.gateway.command,
        config.gateway.workdir.clone(),
    )?);
    let (supervisor, supervisor_task) = ProcessSupervisor::spawn(
        launcher,
        Arc::clone(&credentials),
        Arc::clone(&session),
        SupervisorOptions {
            backoff: config.supervisor.backoff(),
            max_failures: config.supervisor.max_failures,
            stop_grace: config.gateway.stop_grace,
        },
    );

    // Health monitor, forwarding restart requests to the supervisor
    let (monitor_tx, mut monitor_rx) = mpsc::channel(8);
    let monitor = HealthMonitor::new(
        MonitorConfig {
            probe_interval: config.session.probe_interval,
            probe_timeout: config.upstream.timeout,
        },
        Arc::clone(&client) as Arc<dyn GatewayApi>,
        Arc::clone(&session),
        monitor_tx,
        background_token.clone(),
    );
    tokio::spawn(monitor.run());

    let restart_handle = supervisor.clone();
    tokio::spawn(async move {
        while let Some(MonitorEvent::RestartRequested { reason }) = monitor_rx.recv().await {
            restart_handle.request_restart(reason).await;
        }
    });

    // Facade and stream hub
    let control: Arc<dyn GatewayControl> = Arc::new(supervisor);
    let facade = Arc::new(Facade::new(
        Arc::clone(&client) as Arc<dyn GatewayApi>,
        Arc::clone(&control),
        Arc::clone(&session),
        config.facade(),
    ));
    let hub = StreamHub::new(
        HubConfig {
            min_interval: config.stream.min_interval,
            client_buffer: config.stream.client_buffer,
            push_retry: config.stream.heartbeat,
        },
        quotes,
        session.subscribe(),
    );

    // HTTP server
    let port = config.server.http_port;
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .await
        .map_err(|e| ApiServerError::BindFailed(port, e.to_string()))?;
    let server = ApiServer::new(
        port,
        AppState::new(facade, hub.clone(), config.stream.heartbeat),
        server_token.clone(),
    );
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    if config.gateway.autostart {
        match control.start(None).await {
            Ok(status) => tracing::info!(pid = ?status.pid, "Gateway autostarted"),
            Err(e) => tracing::warn!(error = %e, "Gateway autostart failed"),
        }
    }

    tracing::info!("BoomTrade gateway ready");

    await_shutdown().await;

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    let steps = ShutdownSequence::new(server_token, hub, Arc::clone(&control), background_token)
        .run()
        .await;
    tracing::debug!(?steps, "Shutdown sequence finished");
    drop(control);

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = server_task.await;
        let _ = supervisor_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Shutdown timed out waiting for tasks");
    }

    tracing::info!("BoomTrade gateway stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        gateway_url = %config.gateway.base_url,
        autostart = config.gateway.autostart,
        env_credentials = config.env_credentials.is_some(),
        push = config.stream.push_url.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        probe_interval_secs = config.session.probe_interval.as_secs(),
        restart_base_secs = config.supervisor.restart_base.as_secs(),
        restart_cap_secs = config.supervisor.restart_cap.as_secs(),
        max_failures = config.supervisor.max_failures,
        min_interval_ms = config.stream.min_interval.as_millis(),
        client_buffer = config.stream.client_buffer,
        "Supervisor and stream settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
