//! Gateway Adapters
//!
//! Implements the gateway-facing ports:
//!
//! - **client**: REST calls against the gateway's loopback API (`GatewayApi`)
//! - **push**: optional streaming channel for quote updates
//! - **quotes**: the stream hub's `QuoteSource`, combining both
//! - **messages**: wire types shared by the above

pub mod client;
pub mod messages;
pub mod push;
pub mod quotes;

pub use client::{GatewayClient, GatewayClientConfig};
pub use push::{PushFeed, PushFeedConfig, PushFeedError, PushHandle};
pub use quotes::GatewayQuoteSource;
