//! Ordered Shutdown
//!
//! Teardown runs in a fixed order so no stream outlives the gateway:
//!
//! 1. stop accepting HTTP and WebSocket connections
//! 2. notify and close every WebSocket client, stop every symbol worker
//! 3. stop the supervised gateway
//! 4. cancel background tasks (health monitor, push feed)

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::ports::GatewayControl;
use crate::infrastructure::stream::StreamHub;

/// Default time allowed for WebSocket clients to drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A completed shutdown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    /// The HTTP listener stopped accepting.
    ListenerClosed,
    /// Every client was notified and every worker stopped.
    StreamsClosed,
    /// Stream drain hit the timeout.
    StreamsTimedOut,
    /// The gateway process was stopped.
    GatewayStopped,
    /// Stopping the gateway failed.
    GatewayStopFailed,
    /// Background tasks were cancelled.
    BackgroundCancelled,
}

/// Shutdown coordinator.
pub struct ShutdownSequence {
    server: CancellationToken,
    hub: StreamHub,
    control: Arc<dyn GatewayControl>,
    background: CancellationToken,
    drain_timeout: Duration,
}

impl ShutdownSequence {
    /// Create a sequence over the service's parts.
    #[must_use]
    pub fn new(
        server: CancellationToken,
        hub: StreamHub,
        control: Arc<dyn GatewayControl>,
        background: CancellationToken,
    ) -> Self {
        Self {
            server,
            hub,
            control,
            background,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Override the stream drain timeout.
    #[must_use]
    pub const fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Run every step in order. Returns the steps taken.
    pub async fn run(self) -> Vec<ShutdownStep> {
        let mut steps = Vec::with_capacity(4);

        self.server.cancel();
        steps.push(ShutdownStep::ListenerClosed);

        if tokio::time::timeout(self.drain_timeout, self.hub.shutdown())
            .await
            .is_ok()
        {
            steps.push(ShutdownStep::StreamsClosed);
        } else {
            tracing::warn!(timeout = ?self.drain_timeout, "Stream drain timed out");
            steps.push(ShutdownStep::StreamsTimedOut);
        }

        match self.control.stop().await {
            Ok(status) => {
                tracing::info!(running = status.running, "Gateway stopped");
                steps.push(ShutdownStep::GatewayStopped);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Gateway stop failed during shutdown");
                steps.push(ShutdownStep::GatewayStopFailed);
            }
        }

        self.background.cancel();
        steps.push(ShutdownStep::BackgroundCancelled);
        steps
    }
}
