//! Per-request stream accumulation.
//!
//! A [`StreamSession`] exists for exactly one in-flight request: it owns the
//! growing per-channel text buffers, the latest structured payloads, the
//! cancellation token, and the terminal flag. Once a terminal event has been
//! applied, every later event for the session is ignored.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ChartPayload, TablePayload};
use crate::core::conversation::MessageId;
use crate::core::event::StreamEvent;

/// A named text stream within one response, accumulated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Channel {
    Reasoning,
    Content,
    Sql,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Reasoning => "reasoning",
            Channel::Content => "content",
            Channel::Sql => "sql",
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Done,
    Error(String),
    Cancelled,
}

/// What one applied event changed, for the caller to mirror into the bound
/// message.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Channel(Channel),
    Table,
    Chart,
    Done,
    Error(String),
}

pub struct StreamSession {
    message_id: MessageId,
    stream_id: u64,
    channels: BTreeMap<Channel, String>,
    table: Option<TablePayload>,
    chart: Option<ChartPayload>,
    end: Option<SessionEnd>,
    cancel_token: CancellationToken,
}

impl StreamSession {
    pub fn new(message_id: MessageId, stream_id: u64) -> Self {
        StreamSession {
            message_id,
            stream_id,
            channels: BTreeMap::new(),
            table: None,
            chart: None,
            end: None,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.end.is_some()
    }

    pub fn end(&self) -> Option<&SessionEnd> {
        self.end.as_ref()
    }

    pub fn channel_text(&self, channel: Channel) -> Option<&str> {
        self.channels.get(&channel).map(String::as_str)
    }

    pub fn table(&self) -> Option<&TablePayload> {
        self.table.as_ref()
    }

    pub fn chart(&self) -> Option<&ChartPayload> {
        self.chart.as_ref()
    }

    /// Mark the session cancelled and signal the transport to stop. Idempotent
    /// after any terminal state.
    pub fn mark_cancelled(&mut self) -> bool {
        self.cancel_token.cancel();
        if self.end.is_some() {
            return false;
        }
        self.end = Some(SessionEnd::Cancelled);
        true
    }

    /// Apply one decoded event. Returns `None` once the session is terminal:
    /// late frames from a finished or cancelled stream carry no meaning.
    pub fn apply(&mut self, event: StreamEvent) -> Option<SessionUpdate> {
        if self.end.is_some() {
            debug!(stream_id = self.stream_id, "dropping event after terminal");
            return None;
        }

        match event {
            StreamEvent::Reasoning(text) => Some(self.append(Channel::Reasoning, &text)),
            StreamEvent::Content(text) => Some(self.append(Channel::Content, &text)),
            StreamEvent::Sql(text) => Some(self.append(Channel::Sql, &text)),
            StreamEvent::Table(table) => {
                self.table = Some(table);
                Some(SessionUpdate::Table)
            }
            StreamEvent::Chart(chart) => {
                self.chart = Some(chart);
                Some(SessionUpdate::Chart)
            }
            StreamEvent::Error(message) => {
                self.end = Some(SessionEnd::Error(message.clone()));
                Some(SessionUpdate::Error(message))
            }
            StreamEvent::Done { reasoning, content } => {
                // Explicit finals take precedence over accumulated deltas.
                if let Some(reasoning) = reasoning.filter(|text| !text.is_empty()) {
                    self.channels.insert(Channel::Reasoning, reasoning);
                }
                if let Some(content) = content.filter(|text| !text.is_empty()) {
                    self.channels.insert(Channel::Content, content);
                }
                self.end = Some(SessionEnd::Done);
                Some(SessionUpdate::Done)
            }
        }
    }

    fn append(&mut self, channel: Channel, text: &str) -> SessionUpdate {
        self.channels.entry(channel).or_default().push_str(text);
        SessionUpdate::Channel(channel)
    }
}
