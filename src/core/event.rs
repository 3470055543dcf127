//! Decoding of framed payloads into typed protocol events.
//!
//! A malformed frame is a local problem: it is logged and dropped, and the
//! stream keeps going. Unknown event names and chunk types are ignored so
//! that newer backends can add events without breaking older clients.

use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ChartPayload, StreamChunk, TablePayload};
use crate::core::framing::{Frame, FramingMode};

/// One typed protocol event, decoded from a single frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental reasoning ("thinking") text.
    Reasoning(String),
    /// Incremental answer text.
    Content(String),
    /// Incremental generated-query text.
    Sql(String),
    /// Latest tabular result; replaces any previous one.
    Table(TablePayload),
    /// Latest chart configuration; replaces any previous one.
    Chart(ChartPayload),
    /// Protocol-level failure; terminal.
    Error(String),
    /// Successful completion. Explicit finals, when present, override the
    /// accumulated channel text.
    Done {
        reasoning: Option<String>,
        content: Option<String>,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error(_) | StreamEvent::Done { .. })
    }
}

/// Decode one frame. Returns `None` for frames that carry no event: unknown
/// tags, empty deltas, and payloads that fail to parse.
pub fn decode_frame(mode: FramingMode, frame: &Frame) -> Option<StreamEvent> {
    match mode {
        FramingMode::DataLines => decode_data_line(&frame.data),
        FramingMode::NamedEvents => decode_named_event(frame.event.as_deref()?, &frame.data),
    }
}

fn decode_data_line(payload: &str) -> Option<StreamEvent> {
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(StreamEvent::Done {
            reasoning: None,
            content: None,
        });
    }

    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(err) => {
            // A bare JSON string is a content delta; anything else is noise.
            if let Ok(Value::String(text)) = serde_json::from_str::<Value>(payload) {
                return Some(StreamEvent::Content(text));
            }
            warn!(%err, payload, "dropping malformed stream chunk");
            return None;
        }
    };

    match chunk.kind.as_str() {
        "reasoning" => chunk.data.map(StreamEvent::Reasoning),
        "content" => chunk.data.map(StreamEvent::Content),
        "done" => Some(StreamEvent::Done {
            reasoning: chunk.reasoning,
            content: chunk.content,
        }),
        "error" => Some(StreamEvent::Error(
            chunk.error.unwrap_or_else(|| "unknown error".to_string()),
        )),
        other => {
            debug!(kind = other, "ignoring unknown stream chunk type");
            None
        }
    }
}

fn decode_named_event(event: &str, data: &str) -> Option<StreamEvent> {
    match event {
        "thinking" => Some(StreamEvent::Reasoning(data.to_string())),
        "text" => Some(StreamEvent::Content(data.to_string())),
        "sql" => Some(StreamEvent::Sql(data.to_string())),
        "data" => match serde_json::from_str::<TablePayload>(data) {
            Ok(table) => Some(StreamEvent::Table(table)),
            Err(err) => {
                warn!(%err, "dropping malformed data payload");
                None
            }
        },
        "chart" => match serde_json::from_str::<ChartPayload>(data) {
            Ok(chart) => Some(StreamEvent::Chart(chart)),
            Err(err) => {
                warn!(%err, "dropping malformed chart payload");
                None
            }
        },
        "error" => Some(StreamEvent::Error(data.to_string())),
        "done" => Some(StreamEvent::Done {
            reasoning: None,
            content: None,
        }),
        other => {
            debug!(event = other, "ignoring unknown stream event");
            None
        }
    }
}
