//! Error types for resilient WebSocket connections.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```
//! use resilient_ws::{ResilientConnection, Result};
//!
//! fn subscribe(connection: &ResilientConnection) -> Result<()> {
//!     connection.send_json(&serde_json::json!({ "op": "subscribe" }))?;
//!     Ok(())
//! }
//! ```
//!
//! Transient transport failures (socket error, socket close, missed pong)
//! never surface here. They are recovered by the reconnect loop and only
//! narrated through [`ConnectionEvent::Status`](crate::ConnectionEvent::Status).
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidAddress`], [`Error::BeforeConnect`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | External | [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Display;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when connection options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Target address is not a usable WebSocket URL.
    #[error("Invalid address '{address}': {message}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// Why it was rejected.
        message: String,
    },

    /// Pre-connect hook rejected.
    ///
    /// Fatal: the connection is not retried after this.
    #[error("Pre-connect hook failed on attempt {attempt}: {message}")]
    BeforeConnect {
        /// Connection attempt count passed to the hook.
        attempt: u32,
        /// Error reported by the hook.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The socket was closed before the operation completed.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid address error.
    #[inline]
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates a pre-connect hook error.
    #[inline]
    pub fn before_connect(attempt: u32, err: impl Display) -> Self {
        Self::BeforeConnect {
            attempt,
            message: err.to_string(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error stops the reconnect loop for good.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::InvalidAddress { .. } | Self::BeforeConnect { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
