//! Domain Layer - Core gateway, order, and market data types.
//!
//! This layer contains the session state machine, order validation, and
//! subscription bookkeeping with no I/O. All types here are pure Rust with
//! serialization support.

/// Brokerage account identity.
pub mod account;

/// Symbols, quote ticks, and option discovery results.
pub mod market;

/// Order payloads and validation.
pub mod order;

/// Gateway session state machine.
pub mod session;

/// Subscription tracking for streamed symbols.
pub mod subscription;
