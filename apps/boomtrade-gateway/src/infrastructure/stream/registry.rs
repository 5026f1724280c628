//! Connection Registry
//!
//! Holds the bounded outbound queue and the close signal of every live
//! WebSocket connection. Delivery never blocks: a full queue is reported
//! to the caller, which drops the connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use crate::domain::subscription::ConnectionId;

/// Close frame parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text.
    pub reason: &'static str,
}

/// Frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized server message.
    Text(Arc<str>),
    /// Close the socket after everything queued before it.
    Close(CloseReason),
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection's send buffer is full.
    #[error("send buffer full")]
    Full,
    /// The connection is gone.
    #[error("connection closed")]
    Closed,
}

/// Receiving side handed to a connection's writer task.
#[derive(Debug)]
pub struct Registration {
    /// Connection id.
    pub id: ConnectionId,
    /// Bounded outbound queue.
    pub outbound: mpsc::Receiver<Outbound>,
    /// Immediate close signal, bypassing the queue.
    pub close: oneshot::Receiver<CloseReason>,
}

struct ConnectionHandle {
    tx: mpsc::Sender<Outbound>,
    close: Option<oneshot::Sender<CloseReason>>,
}

/// Registry of live connections.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    buffer: usize,
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create a registry whose connections buffer up to `buffer` frames.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    pub fn register(&self) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, outbound) = mpsc::channel(self.buffer);
        let (close_tx, close) = oneshot::channel();
        self.connections.write().insert(
            id,
            ConnectionHandle {
                tx,
                close: Some(close_tx),
            },
        );
        Registration {
            id,
            outbound,
            close,
        }
    }

    /// Queue a text frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Full` when the buffer is full and
    /// `DeliveryError::Closed` when the connection is gone.
    pub fn deliver(&self, id: ConnectionId, text: Arc<str>) -> Result<(), DeliveryError> {
        self.enqueue(id, Outbound::Text(text))
    }

    fn enqueue(&self, id: ConnectionId, frame: Outbound) -> Result<(), DeliveryError> {
        let connections = self.connections.read();
        let handle = connections.get(&id).ok_or(DeliveryError::Closed)?;
        handle.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Close a connection immediately, discarding anything still queued.
    pub fn close_now(&self, id: ConnectionId, reason: CloseReason) {
        let sender = self
            .connections
            .write()
            .get_mut(&id)
            .and_then(|handle| handle.close.take());
        if let Some(sender) = sender {
            let _ = sender.send(reason);
        }
    }

    /// Queue a final message and a close frame behind pending frames.
    ///
    /// Falls back to an immediate close when the buffer has no room.
    pub fn close_after_pending(&self, id: ConnectionId, farewell: Arc<str>, reason: CloseReason) {
        let queued = self
            .enqueue(id, Outbound::Text(farewell))
            .and_then(|()| self.enqueue(id, Outbound::Close(reason)));
        if queued.is_err() {
            self.close_now(id, reason);
        }
    }

    /// Forget a connection. Returns whether it was registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.connections.write().remove(&id).is_some()
    }

    /// Ids of all live connections.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().keys().copied().collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
