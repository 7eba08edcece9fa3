//! Event and frame types.
//!
//! This module defines what a connection publishes to its listeners and
//! what it carries over the wire.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | [`ConnectionEvent`] and the listener bus |
//! | `payload` | [`Payload`] and [`CloseFrame`] |

// ============================================================================
// Submodules
// ============================================================================

/// Connection events and their broadcast.
pub mod event;

/// Frame payloads and close frames.
pub mod payload;

// ============================================================================
// Re-exports
// ============================================================================

pub(crate) use event::EventBus;
pub use event::{ConnectionEvent, EventHandler};
pub use payload::{CloseFrame, Payload};
