use thiserror::Error;

use crate::core::conversation::ConversationId;

/// Failures surfaced by store and client operations.
///
/// Wire-level problems never show up here: malformed frames are dropped by
/// the decoder and transport failures arrive as terminal stream events.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    /// A response is already streaming for this conversation; the new
    /// dispatch was rejected without touching any state.
    #[error("a response is already streaming for this conversation")]
    StreamInFlight,

    #[error("unknown conversation: {0}")]
    UnknownConversation(ConversationId),

    /// Switching away from (or deleting) a conversation with a live stream
    /// is a caller error; cancel first.
    #[error("conversation {0} has a stream in flight")]
    ConversationBusy(ConversationId),
}
