//! Raw WebSocket transport capability.
//!
//! The resilient connection never talks to a socket library directly. It
//! asks a [`SocketFactory`] for one [`RawSocket`] per connection attempt and
//! observes that socket through its [`SocketEvents`] channel.
//!
//! # Contract
//!
//! ```text
//! SocketFactory::create(url, protocols, options)
//!        │
//!        ├──► Arc<dyn RawSocket>   ready_state / send / ping / close / terminate
//!        │
//!        └──► SocketEvents         Open | Pong | Message | Error | Close
//! ```
//!
//! - `create` returns immediately; the handshake happens in the background
//!   and is reported through `Open`, or `Error` followed by `Close`.
//! - Dropping the [`SocketEvents`] receiver detaches every listener at once.
//!   Nothing the socket does afterwards can reach the connection.
//! - [`RawSocket::terminate`] is abrupt: no close handshake is awaited.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `tungstenite` | Default factory backed by `tokio-tungstenite` |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;
use crate::protocol::{CloseFrame, Payload};

// ============================================================================
// Submodules
// ============================================================================

/// Default factory backed by `tokio-tungstenite`.
pub mod tungstenite;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use tungstenite::TungsteniteFactory;

// ============================================================================
// Constants
// ============================================================================

/// Default wait for the peer's close frame after sending ours.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Receiving half of one socket's event stream.
pub type SocketEvents = mpsc::UnboundedReceiver<SocketEvent>;

/// Completion callback for [`RawSocket::send`].
pub type SendCallback = Box<dyn FnOnce(Result<()>) + Send>;

// ============================================================================
// ReadyState
// ============================================================================

/// Socket ready state, numbered like the browser WebSocket API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting = 0,
    /// Open and able to carry frames.
    Open = 1,
    /// Close handshake in progress.
    Closing = 2,
    /// Closed or terminated.
    Closed = 3,
}

impl ReadyState {
    /// Decodes a stored state. Unknown values read as `Closed`.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Returns `true` if frames can be sent.
    #[inline]
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

// ============================================================================
// SocketEvent
// ============================================================================

/// Something that happened on one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Opening handshake completed.
    Open,
    /// Pong received.
    Pong,
    /// Data frame received.
    Message(Payload),
    /// Transport error. Usually followed by `Close`.
    Error(String),
    /// Socket closed. Always the last event of a socket.
    Close(CloseFrame),
}

// ============================================================================
// TransportOptions
// ============================================================================

/// Options passed through untouched to the socket factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportOptions {
    /// Extra HTTP headers for the opening handshake.
    pub headers: BTreeMap<String, String>,

    /// Maximum time to wait for the opening handshake.
    #[serde(with = "crate::connection::options::millis_opt")]
    pub handshake_timeout: Option<Duration>,

    /// Maximum inbound message size in bytes.
    pub max_payload: Option<usize>,

    /// Maximum inbound frame size in bytes.
    pub max_frame_size: Option<usize>,

    /// Maximum wait for the peer's close frame once the close handshake
    /// started. Defaults to [`DEFAULT_CLOSE_TIMEOUT`].
    #[serde(with = "crate::connection::options::millis_opt")]
    pub close_timeout: Option<Duration>,
}

impl TransportOptions {
    /// Creates empty options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handshake header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Sets the maximum inbound message size.
    #[inline]
    #[must_use]
    pub fn with_max_payload(mut self, bytes: usize) -> Self {
        self.max_payload = Some(bytes);
        self
    }

    /// Sets the close handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    /// Returns the close handshake timeout, falling back to the default.
    #[inline]
    #[must_use]
    pub fn close_timeout_or_default(&self) -> Duration {
        self.close_timeout.unwrap_or(DEFAULT_CLOSE_TIMEOUT)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Creates raw sockets, one per connection attempt.
pub trait SocketFactory: Send + Sync + 'static {
    /// Starts connecting to `url` and returns the socket handle with its
    /// event stream.
    ///
    /// Must not block. Connection failures are reported on the event stream,
    /// never returned here.
    fn create(
        &self,
        url: &Url,
        protocols: &[String],
        options: &TransportOptions,
    ) -> (Arc<dyn RawSocket>, SocketEvents);
}

/// Handle to one raw socket.
///
/// All operations are non-blocking.
pub trait RawSocket: Send + Sync {
    /// Returns the current ready state.
    fn ready_state(&self) -> ReadyState;

    /// Queues a data frame. `callback`, if any, receives the write result.
    fn send(&self, payload: Payload, callback: Option<SendCallback>);

    /// Queues a ping frame.
    fn ping(&self, payload: Vec<u8>);

    /// Starts the close handshake.
    fn close(&self, frame: Option<CloseFrame>);

    /// Drops the connection immediately, without a close handshake.
    fn terminate(&self);
}

// ============================================================================
// Tests
// ============================================================================
