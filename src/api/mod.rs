use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One turn of conversation history as transmitted to the backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of a streaming chat request.
///
/// Covers both backend shapes: history-replay backends take `messages` plus
/// the conversation flags, single-turn backends take `session_id` and
/// `message`. Only the fields the active shape uses are serialized.
#[derive(Serialize, Clone, Debug, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChatRequest {
    pub fn with_history(
        messages: Vec<ChatMessage>,
        conversation_id: String,
        thinking_enabled: bool,
    ) -> Self {
        ChatRequest {
            messages,
            conversation_id: Some(conversation_id),
            thinking_enabled: Some(thinking_enabled),
            ..ChatRequest::default()
        }
    }

    pub fn single_turn(session_id: String, message: String) -> Self {
        ChatRequest {
            session_id: Some(session_id),
            message: Some(message),
            ..ChatRequest::default()
        }
    }
}

/// Payload of one single-line protocol chunk: `data: {"type": ..., ...}`.
///
/// Which of the optional fields is populated depends on `kind`: deltas carry
/// `data`, the terminal chunk may carry full `reasoning`/`content` overrides,
/// error chunks carry `error`.
#[derive(Deserialize, Debug)]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Option<String>,
    pub reasoning: Option<String>,
    pub content: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DataPoint {
    pub name: String,
    pub value: Value,
}

/// Tabular query result delivered on the `data` event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TablePayload {
    pub columns: Vec<String>,
    pub rows: Vec<DataPoint>,
    #[serde(default)]
    pub raw: Vec<Vec<Value>>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Scatter,
    Table,
}

/// Chart configuration delivered on the `chart` event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChartPayload {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub data: Vec<DataPoint>,
    #[serde(rename = "xField", skip_serializing_if = "Option::is_none")]
    pub x_field: Option<String>,
    #[serde(rename = "yField", skip_serializing_if = "Option::is_none")]
    pub y_field: Option<String>,
    #[serde(rename = "seriesField", skip_serializing_if = "Option::is_none")]
    pub series_field: Option<String>,
}
