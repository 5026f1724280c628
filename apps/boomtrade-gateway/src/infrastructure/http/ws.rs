//! Market data WebSocket endpoint.
//!
//! Each connection gets a writer task draining its bounded outbound queue
//! and a reader loop handling client actions. Either side ending tears the
//! connection down and removes its subscriptions.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::AppState;
use crate::domain::market::Symbol;
use crate::domain::subscription::ConnectionId;
use crate::infrastructure::stream::protocol::{CLOSE_GOING_AWAY, SHUTDOWN_REASON};
use crate::infrastructure::stream::{
    ClientMessage, CloseReason, Outbound, Registration, ServerMessage, StreamHub,
};

/// Deadline for a single frame write.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, state.heartbeat))
}

async fn handle_socket(mut socket: WebSocket, hub: StreamHub, heartbeat: Duration) {
    let Ok(Registration {
        id,
        outbound,
        close,
    }) = hub.connect()
    else {
        let _ = socket
            .send(close_message(CloseReason {
                code: CLOSE_GOING_AWAY,
                reason: SHUTDOWN_REASON,
            }))
            .await;
        return;
    };

    let (sink, mut stream) = socket.split();
    let mut writer = hub.track(write_loop(id, sink, outbound, close, heartbeat));

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text(&hub, id, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(connection_id = id, error = %e, "WebSocket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    hub.disconnect(id);
}

fn handle_text(hub: &StreamHub, id: ConnectionId, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            hub.send_to(id, &ServerMessage::invalid_message(e.to_string()));
            return;
        }
    };

    match message {
        ClientMessage::Subscribe { symbol } => match Symbol::parse(&symbol) {
            Ok(symbol) => {
                if let Err(e) = hub.subscribe(id, &symbol) {
                    tracing::debug!(connection_id = id, error = %e, "Subscribe refused");
                }
            }
            Err(e) => hub.send_to(id, &ServerMessage::invalid_symbol(e.to_string())),
        },
        ClientMessage::Unsubscribe { symbol } => match Symbol::parse(&symbol) {
            Ok(symbol) => {
                hub.unsubscribe(id, &symbol);
            }
            Err(e) => hub.send_to(id, &ServerMessage::invalid_symbol(e.to_string())),
        },
        ClientMessage::Ping => hub.send_to(id, &ServerMessage::Pong),
    }
}

async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    mut close: oneshot::Receiver<CloseReason>,
    heartbeat: Duration,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);

    loop {
        let message = tokio::select! {
            biased;
            reason = &mut close => match reason {
                Ok(reason) => {
                    send(&mut sink, close_message(reason)).await;
                    break;
                }
                Err(_) => break,
            },
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => Message::Text(Utf8Bytes::from(&*text)),
                Some(Outbound::Close(reason)) => {
                    send(&mut sink, close_message(reason)).await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        if !send(&mut sink, message).await {
            tracing::debug!(connection_id = id, "WebSocket write failed");
            break;
        }
    }
}

async fn send(sink: &mut SplitSink<WebSocket, Message>, message: Message) -> bool {
    matches!(
        tokio::time::timeout(SEND_TIMEOUT, sink.send(message)).await,
        Ok(Ok(()))
    )
}

fn close_message(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code,
        reason: Utf8Bytes::from_static(reason.reason),
    }))
}
