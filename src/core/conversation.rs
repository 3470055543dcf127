//! Conversation and message model, owned by [`ChatStore`].
//!
//! The store is the only place conversations and messages mutate. User
//! messages are immutable once appended; an assistant message mutates only
//! while its conversation has a live [`StreamSession`], and only through the
//! action layer in [`crate::core::actions`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::api::{ChartPayload, ChatMessage, TablePayload};
use crate::core::error::ChatError;
use crate::core::session::{Channel, SessionEnd, StreamSession};

/// Conversation titles derive from the first user turn, truncated to this
/// many characters.
pub const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub u64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TablePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True while the message is the placeholder of an in-flight response.
    pub pending: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Message {
            id,
            role: Role::User,
            content: content.into(),
            reasoning: None,
            sql: None,
            table: None,
            chart: None,
            error: None,
            pending: false,
            created_at: Utc::now(),
        }
    }

    /// The empty assistant message appended at dispatch time and filled in by
    /// streamed deltas.
    pub fn assistant_placeholder(id: MessageId, reasoning_enabled: bool) -> Self {
        Message {
            id,
            role: Role::Assistant,
            content: String::new(),
            reasoning: reasoning_enabled.then(String::new),
            sql: None,
            table: None,
            chart: None,
            error: None,
            pending: true,
            created_at: Utc::now(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Streaming,
}

pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub reasoning_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messages: Vec<Message>,
    state: ConversationState,
    session: Option<StreamSession>,
}

impl Conversation {
    fn new(id: ConversationId, reasoning_enabled: bool) -> Self {
        let now = Utc::now();
        Conversation {
            id,
            title: String::new(),
            reasoning_enabled,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            state: ConversationState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == ConversationState::Streaming
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    pub(crate) fn session_mut(&mut self) -> Option<&mut StreamSession> {
        self.session.as_mut()
    }

    /// The user/assistant turns replayed into a history-carrying request.
    /// The in-flight placeholder and empty assistant turns are skipped.
    pub fn api_history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|message| !message.pending)
            .filter(|message| message.is_user() || !message.content.is_empty())
            .map(|message| ChatMessage {
                role: message.role.as_str().to_string(),
                content: message.content.clone(),
            })
            .collect()
    }

    /// Copy one accumulated channel from the live session into its message.
    pub(crate) fn mirror_channel(&mut self, channel: Channel) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let id = session.message_id();
        let Some(text) = session.channel_text(channel).map(str::to_string) else {
            return;
        };
        if let Some(message) = self.messages.iter_mut().find(|message| message.id == id) {
            match channel {
                Channel::Reasoning => message.reasoning = Some(text),
                Channel::Content => message.content = text,
                Channel::Sql => message.sql = Some(text),
            }
        }
    }

    pub(crate) fn mirror_table(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let id = session.message_id();
        let table = session.table().cloned();
        if let Some(message) = self.messages.iter_mut().find(|message| message.id == id) {
            message.table = table;
        }
    }

    pub(crate) fn mirror_chart(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let id = session.message_id();
        let chart = session.chart().cloned();
        if let Some(message) = self.messages.iter_mut().find(|message| message.id == id) {
            message.chart = chart;
        }
    }

    /// Commit the terminal session state into the bound message, release the
    /// session and return to idle. The terminal kind decides what the message
    /// keeps: done commits finals, error attaches the message alongside the
    /// partial text, cancellation keeps everything accumulated so far.
    pub(crate) fn finish_stream(&mut self) -> Option<(MessageId, SessionEnd)> {
        // Only a terminal session may be committed.
        self.session.as_ref()?.end()?;
        let session = self.session.take()?;
        let end = session.end().cloned()?;
        let id = session.message_id();

        if let Some(message) = self.messages.iter_mut().find(|message| message.id == id) {
            if let Some(text) = session.channel_text(Channel::Content) {
                message.content = text.to_string();
            }
            if let Some(text) = session.channel_text(Channel::Reasoning) {
                if !text.is_empty() {
                    message.reasoning = Some(text.to_string());
                }
            }
            if let Some(text) = session.channel_text(Channel::Sql) {
                message.sql = Some(text.to_string());
            }
            if let Some(table) = session.table() {
                message.table = Some(table.clone());
            }
            if let Some(chart) = session.chart() {
                message.chart = Some(chart.clone());
            }
            if let SessionEnd::Error(error) = &end {
                message.error = Some(error.clone());
            }
            message.pending = false;
        }

        self.state = ConversationState::Idle;
        self.updated_at = Utc::now();
        Some((id, end))
    }
}

/// Everything the transport layer needs to run the request for a freshly
/// dispatched turn.
#[derive(Debug)]
pub struct OpenStream {
    pub conversation: ConversationId,
    pub message: MessageId,
    pub stream_id: u64,
    pub cancel: CancellationToken,
    pub user_text: String,
    pub history: Vec<ChatMessage>,
    pub reasoning_enabled: bool,
}

/// Owns every conversation, the active selection, and the id counters.
pub struct ChatStore {
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
    default_reasoning: bool,
    next_conversation_id: u64,
    next_message_id: u64,
    next_stream_id: u64,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        ChatStore {
            conversations: Vec::new(),
            active: None,
            default_reasoning: false,
            next_conversation_id: 0,
            next_message_id: 0,
            next_stream_id: 0,
        }
    }

    /// Reasoning flag for conversations created implicitly on first dispatch.
    pub fn set_default_reasoning(&mut self, enabled: bool) {
        self.default_reasoning = enabled;
    }

    /// Conversations, newest first.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn active_id(&self) -> Option<ConversationId> {
        self.active
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == id)
    }

    pub(crate) fn conversation_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|conversation| conversation.id == id)
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active.and_then(|id| self.conversation(id))
    }

    pub fn create_conversation(&mut self, reasoning_enabled: bool) -> ConversationId {
        self.next_conversation_id += 1;
        let id = ConversationId(self.next_conversation_id);
        self.conversations
            .insert(0, Conversation::new(id, reasoning_enabled));
        self.active = Some(id);
        id
    }

    /// Select another conversation. Rejected while the current one streams:
    /// the state machine treats that as a precondition, not a queueing
    /// request.
    pub fn switch_conversation(&mut self, id: ConversationId) -> Result<(), ChatError> {
        if let Some(current) = self.active_conversation() {
            if current.is_streaming() && current.id != id {
                return Err(ChatError::ConversationBusy(current.id));
            }
        }
        if self.conversation(id).is_none() {
            return Err(ChatError::UnknownConversation(id));
        }
        self.active = Some(id);
        Ok(())
    }

    /// Remove a conversation from the active set. Deleting the selected one
    /// clears the selection.
    pub fn delete_conversation(&mut self, id: ConversationId) -> Result<(), ChatError> {
        let conversation = self
            .conversation(id)
            .ok_or(ChatError::UnknownConversation(id))?;
        if conversation.is_streaming() {
            return Err(ChatError::ConversationBusy(id));
        }
        self.conversations
            .retain(|conversation| conversation.id != id);
        if self.active == Some(id) {
            self.active = None;
        }
        Ok(())
    }

    /// Conversation owning the session with this stream id, if any is live.
    pub(crate) fn streaming_conversation_mut(
        &mut self,
        stream_id: u64,
    ) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|conversation| {
            conversation
                .session()
                .is_some_and(|session| session.stream_id() == stream_id)
        })
    }

    /// Append the user turn and the assistant placeholder, open the stream
    /// session, and hand back what the transport needs. Creates a
    /// conversation first if none is selected.
    pub(crate) fn begin_turn(&mut self, text: &str) -> Result<OpenStream, ChatError> {
        let conversation_id = match self.active {
            Some(id) => id,
            None => self.create_conversation(self.default_reasoning),
        };

        {
            let conversation = self
                .conversation(conversation_id)
                .ok_or(ChatError::UnknownConversation(conversation_id))?;
            if conversation.is_streaming() {
                return Err(ChatError::StreamInFlight);
            }
        }

        self.next_message_id += 2;
        let user_id = MessageId(self.next_message_id - 1);
        let assistant_id = MessageId(self.next_message_id);
        self.next_stream_id += 1;
        let stream_id = self.next_stream_id;

        let Some(conversation) = self.conversation_mut(conversation_id) else {
            return Err(ChatError::UnknownConversation(conversation_id));
        };

        if conversation.title.is_empty() {
            conversation.title = text.chars().take(TITLE_MAX_CHARS).collect();
        }

        conversation.messages.push(Message::user(user_id, text));
        conversation.messages.push(Message::assistant_placeholder(
            assistant_id,
            conversation.reasoning_enabled,
        ));

        let session = StreamSession::new(assistant_id, stream_id);
        let cancel = session.cancel_token();
        conversation.session = Some(session);
        conversation.state = ConversationState::Streaming;
        conversation.updated_at = Utc::now();

        Ok(OpenStream {
            conversation: conversation_id,
            message: assistant_id,
            stream_id,
            cancel,
            user_text: text.to_string(),
            history: conversation.api_history(),
            reasoning_enabled: conversation.reasoning_enabled,
        })
    }
}
