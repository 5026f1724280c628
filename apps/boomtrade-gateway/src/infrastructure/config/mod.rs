//! Configuration Module
//!
//! Configuration loading for the gateway supervisor service.

mod settings;

pub use settings::{
    AppConfig, ConfigError, GatewaySettings, MIN_STREAM_INTERVAL, ServerSettings,
    SessionSettings, StreamSettings, SupervisorSettings, UpstreamSettings,
};
