//! Frame payloads and close frames.
//!
//! The connection is agnostic to payload content: inbound frames are passed
//! through as [`Payload`] and only additionally decoded when they happen to
//! be valid JSON text.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::Value;

// ============================================================================
// Payload
// ============================================================================

/// A data frame body, either UTF-8 text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the payload bytes regardless of frame kind.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Returns the text if this is a text frame.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Parses the payload as JSON text.
    ///
    /// Returns `None` when the bytes are not a valid JSON document. Binary
    /// frames are decoded too, as long as their bytes are valid JSON.
    #[must_use]
    pub fn to_json(&self) -> Option<Value> {
        serde_json::from_slice(self.as_bytes()).ok()
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

// ============================================================================
// CloseFrame
// ============================================================================

/// Close code and reason for a graceful close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close status code (RFC 6455 section 7.4).
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseFrame {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Closed without a status code in the close frame.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;

    /// Creates a close frame.
    #[inline]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_json_text_parses() {
        let payload = Payload::from(r#"{"a":1}"#);
        assert_eq!(payload.to_json(), Some(json!({ "a": 1 })));
    }

    #[test]
    fn test_plain_text_is_not_json() {
        assert_eq!(Payload::from("not json").to_json(), None);
    }

    #[test]
    fn test_json_scalar_parses() {
        assert_eq!(Payload::from("42").to_json(), Some(json!(42)));
    }

    #[test]
    fn test_binary_json_parses() {
        let payload = Payload::from(br#"[1,2]"#.as_slice());
        assert_eq!(payload.to_json(), Some(json!([1, 2])));
        assert_eq!(payload.as_text(), None);
        assert_eq!(payload.len(), 5);
    }

    #[test]
    fn test_display() {
        assert_eq!(Payload::from("hi").to_string(), "hi");
        assert_eq!(Payload::from(vec![1u8, 2, 3]).to_string(), "<3 bytes>");
    }

    #[test]
    fn test_close_frame_new() {
        let frame = CloseFrame::new(CloseFrame::NORMAL, "bye");
        assert_eq!(frame.code, 1000);
        assert_eq!(frame.reason, "bye");
    }
}
