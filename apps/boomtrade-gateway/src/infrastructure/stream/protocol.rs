//! WebSocket protocol message types.
//!
//! Client frames are JSON objects tagged by `action`; server frames are
//! tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::domain::market::{Symbol, Tick};

/// Close code sent when the service shuts down (going away).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code sent when a connection is dropped for overflowing its buffer.
pub const CLOSE_POLICY: u16 = 1008;

/// Close reason for a dropped slow consumer.
pub const OVERFLOW_REASON: &str = "send buffer overflow";

/// Close reason on shutdown.
pub const SHUTDOWN_REASON: &str = "server shutting down";

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving ticks for a symbol.
    Subscribe {
        /// Raw symbol, validated by the handler.
        symbol: String,
    },
    /// Stop receiving ticks for a symbol.
    Unsubscribe {
        /// Raw symbol.
        symbol: String,
    },
    /// Keepalive.
    Ping,
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Message sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscription confirmed.
    Subscribed {
        /// Normalized symbol.
        symbol: Symbol,
    },
    /// Unsubscription confirmed.
    Unsubscribed {
        /// Normalized symbol.
        symbol: Symbol,
    },
    /// Quote update.
    Tick(Tick),
    /// Request could not be processed. The connection stays open.
    Error {
        /// Machine-readable code.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },
    /// Reply to `ping`.
    Pong,
    /// The service is going away; a close frame follows.
    Shutdown,
}

impl ServerMessage {
    /// Error for an unparseable client frame.
    #[must_use]
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::Error {
            code: "INVALID_MESSAGE",
            message: message.into(),
        }
    }

    /// Error for a bad symbol.
    #[must_use]
    pub fn invalid_symbol(message: impl Into<String>) -> Self {
        Self::Error {
            code: "VALIDATION_ERROR",
            message: message.into(),
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::{Value, json};

    #[test]
    fn parses_client_actions() {
        let sub: ClientMessage =
            serde_json::from_str(r#"{"action":"subscribe","symbol":"aapl"}"#).unwrap();
        assert_eq!(
            sub,
            ClientMessage::Subscribe {
                symbol: "aapl".to_string()
            }
        );
        let ping: ClientMessage = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"dance"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"subscribe"}"#).is_err());
    }

    #[test]
    fn tick_frame_is_flat() {
        let mut tick = Tick::empty(
            Symbol::parse("AAPL").unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 2, 15, 30, 0).unwrap(),
        );
        tick.bid = Some(Decimal::new(18920, 2));

        let value: Value = serde_json::from_str(&ServerMessage::Tick(tick).to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "tick");
        assert_eq!(value["symbol"], "AAPL");
        assert_eq!(value["bid"], "189.20");
        assert!(value.get("high").is_none());
    }

    #[test]
    fn control_frames() {
        let pong: Value = serde_json::from_str(&ServerMessage::Pong.to_json().unwrap()).unwrap();
        assert_eq!(pong, json!({"type": "pong"}));

        let err: Value = serde_json::from_str(
            &ServerMessage::invalid_symbol("symbol cannot be empty")
                .to_json()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "VALIDATION_ERROR");
    }
}
