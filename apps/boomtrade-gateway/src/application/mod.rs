//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with the gateway process, its
//! local API, and credential sources.

/// Port interfaces for external systems (gateway API, process, credentials).
pub mod ports;

/// Application services for session gating, retries, and backoff.
pub mod services;
