//! Connection options and their defaults.
//!
//! Provides the tunables of a [`ResilientConnection`](crate::ResilientConnection):
//! subprotocols, transport pass-through options, reconnect delay and the
//! liveness probe schedule.
//!
//! Options deserialize from the camelCase JSON record used by other
//! clients of the same protocol, with durations in milliseconds:
//!
//! ```
//! use resilient_ws::ConnectionOptions;
//!
//! # fn main() -> Result<(), serde_json::Error> {
//! let options: ConnectionOptions = serde_json::from_str(r#"{
//!     "protocols": "graphql-ws",
//!     "reconnectInterval": 2000,
//!     "pingInterval": 5000,
//!     "pingFailureLimit": 3
//! }"#)?;
//!
//! assert_eq!(options.ack_deadline().as_millis(), 15_100);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::transport::TransportOptions;

// ============================================================================
// Constants
// ============================================================================

/// Default delay between a detected failure and the next connect.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

/// Default interval between liveness probes.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(10_000);

/// Default number of probe intervals without a pong before the connection
/// is declared dead.
pub const DEFAULT_PING_FAILURE_LIMIT: u32 = 2;

/// Slack added to the ack deadline so a pong racing the last probe counts.
pub const ACK_DEADLINE_GRACE: Duration = Duration::from_millis(100);

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Tunables for a resilient connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionOptions {
    /// Subprotocols offered in the opening handshake.
    #[serde(deserialize_with = "one_or_many")]
    pub protocols: Vec<String>,

    /// Options passed through to the socket factory.
    #[serde(rename = "options")]
    pub transport: TransportOptions,

    /// Fixed backoff before reconnecting.
    #[serde(with = "millis")]
    pub reconnect_interval: Duration,

    /// Interval between liveness probes.
    #[serde(with = "millis")]
    pub ping_interval: Duration,

    /// Probe intervals tolerated without a pong.
    pub ping_failure_limit: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            protocols: Vec::new(),
            transport: TransportOptions::default(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_failure_limit: DEFAULT_PING_FAILURE_LIMIT,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one subprotocol.
    #[inline]
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Sets the transport pass-through options.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the reconnect backoff.
    #[inline]
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Sets the probe interval.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the probe failure limit.
    #[inline]
    #[must_use]
    pub fn with_ping_failure_limit(mut self, limit: u32) -> Self {
        self.ping_failure_limit = limit;
        self
    }
}

// ============================================================================
// Derived Values
// ============================================================================

impl ConnectionOptions {
    /// Time allowed between pongs (or between open and the first pong).
    ///
    /// `ping_interval * ping_failure_limit + 100ms`.
    #[must_use]
    pub fn ack_deadline(&self) -> Duration {
        self.ping_interval
            .saturating_mul(self.ping_failure_limit)
            .saturating_add(ACK_DEADLINE_GRACE)
    }

    /// Checks that every interval is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an interval or the failure limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_interval.is_zero() {
            return Err(Error::config("reconnect interval must be greater than zero"));
        }
        if self.ping_interval.is_zero() {
            return Err(Error::config("ping interval must be greater than zero"));
        }
        if self.ping_failure_limit == 0 {
            return Err(Error::config("ping failure limit must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

/// Accepts either a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(protocol) => vec![protocol],
        OneOrMany::Many(protocols) => protocols,
    })
}

/// Durations as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Optional durations as integer milliseconds.
pub(crate) mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::default();
        assert!(options.protocols.is_empty());
        assert_eq!(options.reconnect_interval, Duration::from_millis(5000));
        assert_eq!(options.ping_interval, Duration::from_millis(10_000));
        assert_eq!(options.ping_failure_limit, 2);
        assert_eq!(options.ack_deadline(), Duration::from_millis(20_100));
    }

    #[test]
    fn test_builder_methods() {
        let options = ConnectionOptions::new()
            .with_protocol("graphql-ws")
            .with_reconnect_interval(Duration::from_millis(50))
            .with_ping_interval(Duration::from_millis(20))
            .with_ping_failure_limit(1);

        assert_eq!(options.protocols, vec!["graphql-ws".to_owned()]);
        assert_eq!(options.ack_deadline(), Duration::from_millis(120));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let zero_reconnect = ConnectionOptions::new().with_reconnect_interval(Duration::ZERO);
        let zero_ping = ConnectionOptions::new().with_ping_interval(Duration::ZERO);
        let zero_limit = ConnectionOptions::new().with_ping_failure_limit(0);

        assert!(zero_reconnect.validate().is_err());
        assert!(zero_ping.validate().is_err());
        assert!(zero_limit.validate().is_err());
        assert!(ConnectionOptions::default().validate().is_ok());
    }

    #[test]
    fn test_deserialize_single_protocol() {
        let options: ConnectionOptions = serde_json::from_str(
            r#"{ "protocols": "graphql-ws", "reconnectInterval": 50, "pingInterval": 20, "pingFailureLimit": 1 }"#,
        )
        .expect("valid options");

        assert_eq!(options.protocols, vec!["graphql-ws".to_owned()]);
        assert_eq!(options.reconnect_interval, Duration::from_millis(50));
        assert_eq!(options.ack_deadline(), Duration::from_millis(120));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let options: ConnectionOptions =
            serde_json::from_str(r#"{ "protocols": ["a", "b"], "options": { "maxPayload": 10 } }"#)
                .expect("valid options");

        assert_eq!(options.protocols, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(options.transport.max_payload, Some(10));
        assert_eq!(options.reconnect_interval, DEFAULT_RECONNECT_INTERVAL);
        assert_eq!(options.ping_failure_limit, DEFAULT_PING_FAILURE_LIMIT);
    }

    proptest! {
        #[test]
        fn ack_deadline_is_interval_times_limit_plus_grace(
            interval_ms in 1u64..10_000_000,
            limit in 1u32..1_000,
        ) {
            let options = ConnectionOptions::new()
                .with_ping_interval(Duration::from_millis(interval_ms))
                .with_ping_failure_limit(limit);

            prop_assert_eq!(
                options.ack_deadline(),
                Duration::from_millis(interval_ms * u64::from(limit) + 100)
            );
        }
    }
}
