//! Self-healing WebSocket connection.
//!
//! A [`ResilientConnection`] keeps one logical connection alive across any
//! number of underlying sockets. It probes the peer with pings, declares the
//! socket dead when no pong arrives within the ack deadline, and reconnects
//! after a fixed backoff until [`ResilientConnection::close`] is called.
//!
//! # Example
//!
//! ```no_run
//! use resilient_ws::{ConnectionEvent, ResilientConnection};
//!
//! # async fn example() -> resilient_ws::Result<()> {
//! let connection = ResilientConnection::connect("wss://stream.example.com/v1")?;
//! let mut events = connection.subscribe();
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::Open => connection.send_json(&serde_json::json!({ "op": "subscribe" }))?,
//!         ConnectionEvent::Json(value) => println!("{value}"),
//!         ConnectionEvent::Status(text) => tracing::info!(%text, "status"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `options` | Tunables and defaults |
//! | `state` | Observable lifecycle state |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, trace};

use crate::error::Result;
use crate::identifiers::SubscriptionId;
use crate::protocol::{CloseFrame, ConnectionEvent, Payload};
use crate::transport::{SendCallback, SocketFactory};

use self::supervisor::{ConnectionCommand, Shared, Supervisor, parse_address};

// ============================================================================
// Submodules
// ============================================================================

/// Tunables and defaults.
pub mod options;

/// Observable lifecycle state.
pub mod state;

mod builder;
mod supervisor;
pub(crate) mod timer;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionBuilder;
pub use options::ConnectionOptions;
pub use state::LifecycleState;
pub use supervisor::{BeforeConnect, HookError};

// ============================================================================
// ResilientConnection
// ============================================================================

/// Handle to a self-healing WebSocket connection.
///
/// Cheap to clone; all clones control the same connection. When the last
/// handle is dropped without [`close`](Self::close), the current socket is
/// terminated and the connection stops silently.
///
/// Callbacks registered with [`on`](Self::on) should capture a
/// [`WeakConnection`] instead of a clone: a clone stored in a callback
/// keeps the connection alive until `close` is called.
#[derive(Clone)]
pub struct ResilientConnection {
    /// Shared state.
    inner: Arc<Shared>,
    /// Command channel to the supervisor task.
    commands: mpsc::UnboundedSender<ConnectionCommand>,
}

impl fmt::Debug for ResilientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientConnection")
            .field("address", &*self.inner.address.lock())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WeakConnection
// ============================================================================

/// Non-owning handle to a [`ResilientConnection`].
///
/// Does not count towards the handles that keep the connection running.
/// Created with [`ResilientConnection::downgrade`].
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<Shared>,
    commands: mpsc::WeakUnboundedSender<ConnectionCommand>,
}

impl WeakConnection {
    /// Returns a full handle while at least one other handle is alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ResilientConnection> {
        let commands = self.commands.upgrade()?;
        let inner = self.inner.upgrade()?;
        Some(ResilientConnection { inner, commands })
    }
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnection").finish_non_exhaustive()
    }
}

// ============================================================================
// ResilientConnection - Constructor
// ============================================================================

impl ResilientConnection {
    /// Creates a builder for a connection to `address`.
    #[inline]
    #[must_use]
    pub fn builder(address: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder::new(address)
    }

    /// Starts connecting to `address` with default options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`](crate::Error::InvalidAddress) if `address` is not a `ws://` or
    /// `wss://` URL.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn connect(address: impl Into<String>) -> Result<Self> {
        Self::builder(address).connect()
    }

    /// Spawns the supervisor. Configuration is already validated.
    pub(crate) fn spawn(
        address: String,
        options: ConnectionOptions,
        before_connect: Option<BeforeConnect>,
        factory: Arc<dyn SocketFactory>,
    ) -> Self {
        let inner = Arc::new(Shared::new(address));
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor::new(
            Arc::clone(&inner),
            options,
            before_connect,
            factory,
            commands_rx,
        );
        tokio::spawn(supervisor.run());

        Self { inner, commands }
    }

    /// Returns a handle that does not keep the connection alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
            commands: self.commands.downgrade(),
        }
    }
}

// ============================================================================
// ResilientConnection - Events
// ============================================================================

impl ResilientConnection {
    /// Returns a receiver of every event emitted from now on.
    ///
    /// A receiver that falls more than 1024 events behind observes
    /// [`broadcast::error::RecvError::Lagged`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.bus.subscribe()
    }

    /// Registers a callback for every event emitted from now on.
    ///
    /// Callbacks run on the connection's event loop in registration order.
    /// A callback that needs the connection should capture
    /// [`downgrade`](Self::downgrade) rather than a clone, or the
    /// connection outlives its last external handle:
    ///
    /// ```no_run
    /// # use resilient_ws::{ConnectionEvent, ResilientConnection};
    /// # fn example(connection: &ResilientConnection) {
    /// let weak = connection.downgrade();
    /// connection.on(move |event| {
    ///     if *event == ConnectionEvent::Open
    ///         && let Some(connection) = weak.upgrade()
    ///     {
    ///         connection.send("hello");
    ///     }
    /// });
    /// # }
    /// ```
    pub fn on<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(Arc::new(handler))
    }

    /// Removes a callback. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.bus.off(id)
    }
}

// ============================================================================
// ResilientConnection - Sending
// ============================================================================

impl ResilientConnection {
    /// Sends a frame on the current socket.
    ///
    /// Dropped without error unless the current socket is open.
    pub fn send(&self, payload: impl Into<Payload>) {
        self.dispatch(payload.into(), None);
    }

    /// Sends a frame and reports the transport outcome to `callback`.
    ///
    /// If the frame is dropped because the socket is not open, `callback`
    /// is never called.
    pub fn send_with_callback<F>(&self, payload: impl Into<Payload>, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.dispatch(payload.into(), Some(Box::new(callback)));
    }

    /// Serializes `value` as JSON and sends it as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if `value` fails to serialize. Nothing is sent
    /// in that case.
    pub fn send_json<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(value)?;
        self.send(text);
        Ok(())
    }

    /// Serializes `value` as JSON, sends it as a text frame and reports the
    /// transport outcome to `callback`.
    ///
    /// As with [`send_with_callback`](Self::send_with_callback), `callback`
    /// is never called if the frame is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if `value` fails to
    /// serialize. Nothing is sent and `callback` is not called.
    pub fn send_json_with_callback<T, F>(&self, value: &T, callback: F) -> Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let text = serde_json::to_string(value)?;
        self.dispatch(text.into(), Some(Box::new(callback)));
        Ok(())
    }

    fn dispatch(&self, payload: Payload, callback: Option<SendCallback>) {
        match self.inner.current_socket() {
            Some(socket) if socket.ready_state().is_open() => socket.send(payload, callback),
            _ => trace!(len = payload.len(), "Socket not open, dropping frame"),
        }
    }
}

// ============================================================================
// ResilientConnection - Lifecycle
// ============================================================================

impl ResilientConnection {
    /// Closes the connection for good with no close frame.
    ///
    /// Idempotent. Cancels any pending reconnect.
    pub fn close(&self) {
        self.request_close(None);
    }

    /// Closes the connection for good, sending `code` and `reason` to the peer.
    ///
    /// Idempotent. Only the first call's frame is sent.
    pub fn close_with_reason(&self, code: u16, reason: impl Into<String>) {
        self.request_close(Some(CloseFrame::new(code, reason)));
    }

    fn request_close(&self, frame: Option<CloseFrame>) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Close requested");
        if let Err(mpsc::error::SendError(ConnectionCommand::Close(frame))) =
            self.commands.send(ConnectionCommand::Close(frame))
        {
            // Supervisor already gone
            if let Some(socket) = self.inner.current_socket() {
                socket.close(frame);
            }
        }
    }

    /// Returns `true` iff the current socket exists and is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner
            .current_socket()
            .is_some_and(|socket| socket.ready_state().is_open())
    }

    /// Returns `true` once closed or stopped by a fatal error.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.inner.state_tx.borrow()
    }

    /// Returns a receiver that observes lifecycle state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state_tx.subscribe()
    }

    /// Returns the address the next connect will use.
    #[must_use]
    pub fn address(&self) -> String {
        self.inner.address.lock().clone()
    }

    /// Replaces the address used by the next connect.
    ///
    /// The current socket is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`](crate::Error::InvalidAddress) if `address` is not a `ws://` or
    /// `wss://` URL. The stored address is unchanged in that case.
    pub fn update_address(&self, address: impl Into<String>) -> Result<()> {
        let address = address.into();
        parse_address(&address)?;
        debug!(address = %address, "Address updated");
        *self.inner.address.lock() = address;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
