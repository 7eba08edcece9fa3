//! Observable lifecycle state.

// ============================================================================
// LifecycleState
// ============================================================================

/// Where a resilient connection is in its lifecycle.
///
/// ```text
/// Init ──► Connecting ──► Connected
///  ▲            │              │
///  │            ▼              ▼
///  └──────── Reconnecting ◄────┘        any ──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Pre-connect hook running or about to run.
    Init,
    /// Socket created, waiting for the opening handshake.
    Connecting {
        /// Connection attempt number, starting at 1.
        attempt: u32,
    },
    /// Socket open, liveness probing active.
    Connected {
        /// Connection attempt number.
        attempt: u32,
    },
    /// Failure detected, waiting out the backoff.
    Reconnecting {
        /// Attempt number of the connection that failed.
        attempt: u32,
    },
    /// Terminal.
    Closed,
}

impl LifecycleState {
    /// Returns `true` while connected.
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Returns `true` once closed.
    #[inline]
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

// ============================================================================
// Tests
// ============================================================================
