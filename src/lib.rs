//! Chatpipe is the streaming core of an LLM chat client: it turns a chunked
//! HTTP response carrying a server-sent-event style protocol into typed
//! events, accumulates parallel text channels (reasoning, answer, generated
//! SQL) per in-flight request, and reconciles the result into a conversation
//! history that stays consistent under cancellation and error.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core::framing`] and [`core::event`] turn raw bytes into complete
//!   frames and frames into typed [`core::event::StreamEvent`]s, surviving
//!   arbitrary chunk boundaries and swallowing malformed frames.
//! - [`core::session`] accumulates one request's channels and payloads and
//!   tracks its terminal state.
//! - [`core::conversation`] owns conversations and messages; every mutation
//!   flows through the action dispatch in [`core::actions`].
//! - [`core::chat_stream`] drives the HTTP request and forwards decoded
//!   events, racing the cancellation token.
//! - [`core::client`] is the facade a host UI talks to.
//!
//! Rendering, persistence, and authentication are the host's business; the
//! crate exposes store state plus [`core::actions::ChatUpdate`]
//! notifications and takes text and cancellation in return.

pub mod api;
pub mod core;
pub mod utils;

pub use crate::api::{ChartKind, ChartPayload, ChatMessage, ChatRequest, DataPoint, TablePayload};
pub use crate::core::actions::{ChatAction, ChatCommand, ChatUpdate, StreamOutcome};
pub use crate::core::client::ChatClient;
pub use crate::core::config::{Config, EofPolicy};
pub use crate::core::conversation::{
    ChatStore, Conversation, ConversationId, Message, MessageId, Role,
};
pub use crate::core::error::ChatError;
pub use crate::core::event::StreamEvent;
pub use crate::core::framing::FramingMode;
pub use crate::core::session::Channel;
