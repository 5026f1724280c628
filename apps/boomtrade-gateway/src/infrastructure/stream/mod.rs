//! Market Data Streaming
//!
//! Fan-out of quote ticks to WebSocket clients.
//!
//! ```text
//! QuoteSource ──► SymbolWorker (per symbol) ──► StreamHub ──► ConnectionRegistry ──► clients
//! ```

pub mod hub;
pub mod protocol;
pub mod registry;
pub mod worker;

pub use hub::{HubConfig, HubError, StreamHub};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{CloseReason, ConnectionRegistry, DeliveryError, Outbound, Registration};
pub use worker::SymbolWorker;
