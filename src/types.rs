//! Core types for the event store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One immutable entry of the store.
///
/// The payload is opaque: the store never parses or validates it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Time-ordered id; sorts as a string in append order.
    pub id: String,
    /// Raw payload bytes as submitted to `append`.
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .finish()
    }
}

/// Resume position of a subscription.
///
/// Either the start of the store (empty) or the id of the last event the
/// consumer actually handled. Resumption is exclusive: the event whose id
/// equals the cursor is never delivered again.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Position before the first event.
    pub fn start() -> Self {
        Self(String::new())
    }

    /// Position just after the event with the given id.
    pub fn after(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Move the cursor past a delivered event.
    pub(crate) fn advance(&mut self, id: &str) {
        self.0.clear();
        self.0.push_str(id);
    }
}

impl From<&str> for Cursor {
    fn from(id: &str) -> Self {
        Self::after(id)
    }
}

impl From<String> for Cursor {
    fn from(id: String) -> Self {
        Self::after(id)
    }
}

impl From<&Event> for Cursor {
    fn from(event: &Event) -> Self {
        Self::after(event.id.clone())
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_start() {
            write!(f, "Cursor(start)")
        } else {
            write!(f, "Cursor({})", self.0)
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_ordering_matches_ids() {
        let start = Cursor::start();
        let a = Cursor::after("0190a0b0-0000-7000-8000-000000000001");
        let b = Cursor::after("0190a0b0-0000-7000-8000-000000000002");

        assert!(start.is_start());
        assert!(start < a);
        assert!(a < b);
    }

    #[test]
    fn test_cursor_advance() {
        let mut cursor = Cursor::start();
        cursor.advance("id-1");
        assert_eq!(cursor.as_str(), "id-1");
        cursor.advance("id-2");
        assert_eq!(cursor, Cursor::from("id-2"));
    }

    #[test]
    fn test_event_payload_str() {
        let event = Event::new("id", b"hello".to_vec());
        assert_eq!(event.payload_str(), Some("hello"));

        let binary = Event::new("id", vec![0xff, 0xfe]);
        assert_eq!(binary.payload_str(), None);
    }
}
