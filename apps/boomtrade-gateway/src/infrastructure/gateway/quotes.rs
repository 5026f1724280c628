//! Quote source backed by the gateway client and the optional push feed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::client::GatewayClient;
use super::push::PushHandle;
use crate::application::ports::{GatewayError, QuoteSource};
use crate::domain::market::{Symbol, Tick};

/// Snapshot polling through the REST client, push through the feed when
/// one is configured.
#[derive(Clone)]
pub struct GatewayQuoteSource {
    client: Arc<GatewayClient>,
    push: Option<PushHandle>,
}

impl GatewayQuoteSource {
    /// Create a quote source.
    #[must_use]
    pub const fn new(client: Arc<GatewayClient>, push: Option<PushHandle>) -> Self {
        Self { client, push }
    }
}

#[async_trait]
impl QuoteSource for GatewayQuoteSource {
    async fn snapshot(&self, symbol: &Symbol) -> Result<Tick, GatewayError> {
        self.client.snapshot(symbol).await
    }

    async fn open_push(&self, symbol: &Symbol) -> Option<mpsc::Receiver<Tick>> {
        match &self.push {
            Some(push) => push.subscribe(symbol).await,
            None => None,
        }
    }

    async fn close_push(&self, symbol: &Symbol) {
        if let Some(push) = &self.push {
            push.unsubscribe(symbol).await;
        }
    }
}
