//! Resilient WebSocket - Self-healing WebSocket client.
//!
//! This library keeps a long-lived WebSocket connection alive across
//! network failures, silent peer death and server restarts.
//!
//! # Architecture
//!
//! Each [`ResilientConnection`] is a cheap handle to one supervisor task:
//!
//! - **Supervisor**: Owns the lifecycle state machine, timers and the
//!   current socket generation
//! - **Socket factory**: Creates one raw socket per connection attempt
//!   ([`TungsteniteFactory`] by default)
//! - **Listeners**: Callbacks or broadcast receivers of [`ConnectionEvent`]
//!
//! Key design principles:
//!
//! - Liveness by ping/pong: no pong within `ping_interval * ping_failure_limit + 100ms`
//!   means the socket is dead
//! - Every failure path funnels into one reconnect, scheduled at most once
//! - Retired sockets are detached before they are terminated
//! - [`ResilientConnection::close`] is final
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use resilient_ws::{ConnectionEvent, ResilientConnection, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = ResilientConnection::builder("wss://stream.example.com/v1")
//!         .reconnect_interval(Duration::from_secs(2))
//!         .connect()?;
//!
//!     connection.on(|event| {
//!         if let ConnectionEvent::Status(text) = event {
//!             println!("{text}");
//!         }
//!     });
//!
//!     let mut events = connection.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         if let ConnectionEvent::Json(value) = event {
//!             println!("{value}");
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | [`ResilientConnection`], its builder, options and state |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Events and frame payloads |
//! | [`transport`] | Raw socket capability and the default factory |
//!
//! # Features
//!
//! - `rustls-tls`: `wss://` support through rustls with native roots
//! - `native-tls`: `wss://` support through the platform TLS stack

// ============================================================================
// Modules
// ============================================================================

/// Self-healing connection.
///
/// Use [`ResilientConnection::builder()`] to configure one.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Connection events and frame payloads.
pub mod protocol;

/// Raw WebSocket transport.
///
/// Implement [`SocketFactory`] to plug in another socket library.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{
    BeforeConnect, ConnectionBuilder, ConnectionOptions, HookError, LifecycleState,
    ResilientConnection, WeakConnection,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::SubscriptionId;

// Protocol types
pub use protocol::{CloseFrame, ConnectionEvent, EventHandler, Payload};

// Transport types
pub use transport::{
    RawSocket, ReadyState, SendCallback, SocketEvent, SocketEvents, SocketFactory,
    TransportOptions, TungsteniteFactory,
};
