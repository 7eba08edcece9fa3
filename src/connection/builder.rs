//! Builder pattern for connection configuration.
//!
//! Provides a fluent API for configuring and starting
//! [`ResilientConnection`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use resilient_ws::ResilientConnection;
//!
//! # async fn example() -> resilient_ws::Result<()> {
//! let connection = ResilientConnection::builder("wss://stream.example.com/v1")
//!     .protocol("graphql-ws")
//!     .reconnect_interval(Duration::from_secs(2))
//!     .ping_interval(Duration::from_secs(5))
//!     .before_connect(|attempt| async move {
//!         tracing::info!(attempt, "refreshing token");
//!         Ok::<(), resilient_ws::HookError>(())
//!     })
//!     .connect()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::error::Result;
use crate::transport::{SocketFactory, TransportOptions, TungsteniteFactory};

use super::ResilientConnection;
use super::options::ConnectionOptions;
use super::supervisor::{BeforeConnect, HookError, parse_address};

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for configuring a [`ResilientConnection`].
///
/// Use [`ResilientConnection::builder()`] to create a new builder.
pub struct ConnectionBuilder {
    /// Initial address.
    address: String,
    /// Tunables.
    options: ConnectionOptions,
    /// Optional pre-connect hook.
    before_connect: Option<BeforeConnect>,
    /// Socket factory. Defaults to [`TungsteniteFactory`].
    factory: Option<Arc<dyn SocketFactory>>,
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("address", &self.address)
            .field("options", &self.options)
            .field("before_connect", &self.before_connect.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionBuilder Implementation
// ============================================================================

impl ConnectionBuilder {
    /// Creates a builder for `address` with default options.
    #[inline]
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            options: ConnectionOptions::default(),
            before_connect: None,
            factory: None,
        }
    }

    /// Replaces every option at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds a subprotocol to offer in the handshake.
    #[inline]
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.options.protocols.push(protocol.into());
        self
    }

    /// Replaces the subprotocol list.
    #[must_use]
    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the options passed through to the socket factory.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: TransportOptions) -> Self {
        self.options.transport = transport;
        self
    }

    /// Sets the fixed delay before each reconnect.
    #[inline]
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.options.reconnect_interval = interval;
        self
    }

    /// Sets the interval between liveness probes.
    #[inline]
    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.options.ping_interval = interval;
        self
    }

    /// Sets how many probe intervals may pass without a pong.
    #[inline]
    #[must_use]
    pub fn ping_failure_limit(mut self, limit: u32) -> Self {
        self.options.ping_failure_limit = limit;
        self
    }

    /// Sets a hook awaited before every connect.
    ///
    /// The hook receives the number of connect attempts made so far (0
    /// before the first). If it fails, the connection emits
    /// [`ConnectionEvent::Fatal`](crate::ConnectionEvent::Fatal) and stops
    /// for good.
    ///
    /// # Arguments
    ///
    /// * `hook` - Async function of the attempt count
    #[must_use]
    pub fn before_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HookError>> + Send + 'static,
    {
        self.before_connect = Some(Arc::new(move |attempt| hook(attempt).boxed()));
        self
    }

    /// Sets the socket factory.
    #[inline]
    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn SocketFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Validates the configuration and starts connecting.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`](crate::Error::InvalidAddress) if the
    ///   address is not a `ws://` or `wss://` URL
    /// - [`Error::Config`](crate::Error::Config) if an interval or the failure
    ///   limit is zero
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn connect(self) -> Result<ResilientConnection> {
        parse_address(&self.address)?;
        self.options.validate()?;

        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(TungsteniteFactory::new()));

        Ok(ResilientConnection::spawn(
            self.address,
            self.options,
            self.before_connect,
            factory,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;

    #[test]
    fn test_new_uses_default_options() {
        let builder = ConnectionBuilder::new("ws://localhost:1");
        assert_eq!(builder.address, "ws://localhost:1");
        assert_eq!(builder.options, ConnectionOptions::default());
        assert!(builder.before_connect.is_none());
        assert!(builder.factory.is_none());
    }

    #[test]
    fn test_setters_update_options() {
        let builder = ConnectionBuilder::new("ws://localhost:1")
            .protocol("a")
            .protocol("b")
            .reconnect_interval(Duration::from_millis(50))
            .ping_interval(Duration::from_millis(20))
            .ping_failure_limit(1);

        assert_eq!(builder.options.protocols, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(builder.options.ack_deadline(), Duration::from_millis(120));
    }

    #[test]
    fn test_protocols_replaces_list() {
        let builder = ConnectionBuilder::new("ws://localhost:1")
            .protocol("old")
            .protocols(["x", "y"]);
        assert_eq!(builder.options.protocols, vec!["x".to_owned(), "y".to_owned()]);
    }

    #[test]
    fn test_debug_hides_hook() {
        let builder = ConnectionBuilder::new("ws://localhost:1")
            .before_connect(|_| async { Ok::<(), HookError>(()) });
        let debug = format!("{builder:?}");
        assert!(debug.contains("before_connect: true"));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_address() {
        let err = ConnectionBuilder::new("http://localhost:1")
            .connect()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_connect_rejects_zero_interval() {
        let err = ConnectionBuilder::new("ws://localhost:1")
            .reconnect_interval(Duration::ZERO)
            .connect()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
