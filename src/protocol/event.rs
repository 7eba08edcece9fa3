//! Connection events and their broadcast.
//!
//! Every observable change on a [`ResilientConnection`](crate::ResilientConnection)
//! is published as a [`ConnectionEvent`].
//!
//! # Event Types
//!
//! | Event | Name | Payload |
//! |-------|------|---------|
//! | [`ConnectionEvent::Open`] | `open` | - |
//! | [`ConnectionEvent::Close`] | `close` | code, reason |
//! | [`ConnectionEvent::Message`] | `message` | raw frame |
//! | [`ConnectionEvent::Json`] | `json` | parsed value |
//! | [`ConnectionEvent::Pong`] | `pong` | - |
//! | [`ConnectionEvent::Status`] | `websocket-status` | human-readable text |
//! | [`ConnectionEvent::Fatal`] | `fatal` | error message |
//!
//! Listeners attach either as synchronous callbacks ([`EventHandler`]) or as
//! broadcast receivers. Events are delivered only to listeners present at
//! emission time; nothing is buffered for late subscribers.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::identifiers::SubscriptionId;

use super::payload::Payload;

// ============================================================================
// Constants
// ============================================================================

/// Broadcast channel capacity for events.
const BROADCAST_CAPACITY: usize = 1024;

// ============================================================================
// Types
// ============================================================================

/// Event listener callback.
///
/// Invoked synchronously on the connection's event loop, in registration
/// order. Keep it short; long work belongs on a spawned task.
pub type EventHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

// ============================================================================
// ConnectionEvent
// ============================================================================

/// An event published by a resilient connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The current socket finished its opening handshake.
    Open,

    /// The current socket closed.
    Close {
        /// Close status code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// An inbound data frame, whatever its content.
    Message(Payload),

    /// An inbound data frame that parsed as JSON.
    ///
    /// Always preceded by the [`ConnectionEvent::Message`] for the same frame.
    Json(Value),

    /// The peer acknowledged a liveness probe.
    Pong,

    /// Operational narration of a lifecycle transition.
    Status(String),

    /// The connection stopped for good without an explicit close.
    Fatal(String),
}

impl ConnectionEvent {
    /// Returns the event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close { .. } => "close",
            Self::Message(_) => "message",
            Self::Json(_) => "json",
            Self::Pong => "pong",
            Self::Status(_) => "websocket-status",
            Self::Fatal(_) => "fatal",
        }
    }

    /// Returns the status text if this is a status event.
    #[inline]
    #[must_use]
    pub fn as_status(&self) -> Option<&str> {
        match self {
            Self::Status(text) => Some(text),
            _ => None,
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Publish/subscribe channel owned by one connection.
pub(crate) struct EventBus {
    /// Callback listeners, kept in registration order.
    handlers: RwLock<Vec<(SubscriptionId, EventHandler)>>,
    /// Broadcast sender for receiver-style listeners.
    broadcast_tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    /// Creates a bus with no listeners.
    pub(crate) fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: RwLock::new(Vec::new()),
            broadcast_tx,
        }
    }

    /// Registers a callback listener.
    pub(crate) fn on(&self, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.handlers.write().push((id, handler));
        id
    }

    /// Removes a callback listener. Returns `false` if it was not registered.
    pub(crate) fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Drops every callback listener.
    pub(crate) fn clear(&self) {
        // Handlers may own connection handles; drop them outside the lock
        let handlers = std::mem::take(&mut *self.handlers.write());
        drop(handlers);
    }

    /// Returns a new broadcast receiver.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Returns `true` if at least one listener is attached.
    pub(crate) fn has_listeners(&self) -> bool {
        self.broadcast_tx.receiver_count() > 0 || !self.handlers.read().is_empty()
    }

    /// Delivers an event to every current listener.
    ///
    /// Handlers are snapshotted first so a handler may call `on`/`off`
    /// without deadlocking.
    pub(crate) fn emit(&self, event: ConnectionEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in &handlers {
            handler(&event);
        }

        // No receivers is not an error
        let _ = self.broadcast_tx.send(event);
    }
}

// ============================================================================
// Tests
// ============================================================================
