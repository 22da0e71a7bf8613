//! Wire helpers for front-ends that relay events to remote consumers.
//!
//! The store never looks inside payloads. These helpers are for transports
//! that embed JSON payloads verbatim, such as a server-sent-events endpoint
//! that uses event ids as SSE ids and resumes from `Last-Event-ID`.

use crate::error::{Result, StoreError};
use crate::types::Event;
use serde::Serialize;
use serde_json::value::RawValue;
use std::fmt::Write;

/// `{"id": ..., "event": <payload>}` with the payload embedded unparsed.
#[derive(Debug, Serialize)]
pub struct EventEnvelope<'a> {
    pub id: &'a str,
    pub event: &'a RawValue,
}

impl<'a> EventEnvelope<'a> {
    /// Wrap an event whose payload is a JSON document.
    pub fn from_event(event: &'a Event) -> Result<Self> {
        let raw: &RawValue = serde_json::from_slice(&event.payload).map_err(|e| {
            StoreError::Deserialization(format!("payload of {} is not JSON: {e}", event.id))
        })?;
        Ok(Self {
            id: &event.id,
            event: raw,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Name used for the `event:` field of SSE frames.
pub const SSE_EVENT_NAME: &str = "event";

/// Render an event as one server-sent-events frame.
///
/// Multi-line payloads become one `data:` line per payload line, which
/// SSE clients join back with `\n`. Payloads that are not UTF-8 are
/// rendered lossily.
pub fn sse_frame(event: &Event) -> String {
    let payload = String::from_utf8_lossy(&event.payload);
    let mut frame = String::with_capacity(payload.len() + event.id.len() + 32);

    let _ = writeln!(frame, "id: {}", event.id);
    let _ = writeln!(frame, "event: {SSE_EVENT_NAME}");
    for line in payload.split('\n') {
        let _ = writeln!(frame, "data: {}", line.trim_end_matches('\r'));
    }
    frame.push('\n');
    frame
}
