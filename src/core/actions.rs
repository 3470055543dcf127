//! Typed action dispatch for the conversation state machine.
//!
//! Every mutation of the store flows through [`apply_action`]: user turns,
//! decoded stream events, cancellation, and conversation management. The
//! function is pure with respect to IO, which is what makes the state
//! machine testable without a live network.

use tracing::debug;

use crate::core::conversation::{ChatStore, ConversationId, MessageId, OpenStream};
use crate::core::error::ChatError;
use crate::core::event::StreamEvent;
use crate::core::session::{Channel, SessionEnd, SessionUpdate};

/// Inputs to the state machine.
#[derive(Debug)]
pub enum ChatAction {
    /// Dispatch a user turn on the active conversation (creating one if none
    /// is selected). Rejected while a response is streaming.
    SubmitMessage { text: String },
    /// A decoded protocol event from the transport, tagged with the stream it
    /// belongs to. Events for finished or cancelled streams are dropped.
    StreamEvent { stream_id: u64, event: StreamEvent },
    /// Cancel the active conversation's in-flight response. No-op when idle.
    CancelStreaming,
    NewConversation { reasoning_enabled: bool },
    SwitchConversation { id: ConversationId },
    DeleteConversation { id: ConversationId },
}

/// Side effects the caller must carry out after an action was applied.
#[derive(Debug)]
pub enum ChatCommand {
    OpenStream(OpenStream),
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Done,
    Error(String),
    Cancelled,
}

/// Notifications for the host. The store remains the authoritative state;
/// updates only say what changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    ConversationCreated {
        conversation: ConversationId,
    },
    ConversationSwitched {
        conversation: ConversationId,
    },
    ConversationDeleted {
        conversation: ConversationId,
    },
    StreamStarted {
        conversation: ConversationId,
        message: MessageId,
        stream_id: u64,
    },
    ChannelUpdated {
        conversation: ConversationId,
        message: MessageId,
        channel: Channel,
    },
    TableUpdated {
        conversation: ConversationId,
        message: MessageId,
    },
    ChartUpdated {
        conversation: ConversationId,
        message: MessageId,
    },
    StreamFinished {
        conversation: ConversationId,
        message: MessageId,
        outcome: StreamOutcome,
    },
}

/// Apply one action to the store.
pub fn apply_action(
    store: &mut ChatStore,
    action: ChatAction,
) -> Result<(Vec<ChatUpdate>, Option<ChatCommand>), ChatError> {
    match action {
        ChatAction::SubmitMessage { text } => {
            let open = store.begin_turn(&text)?;
            let updates = vec![ChatUpdate::StreamStarted {
                conversation: open.conversation,
                message: open.message,
                stream_id: open.stream_id,
            }];
            Ok((updates, Some(ChatCommand::OpenStream(open))))
        }
        ChatAction::StreamEvent { stream_id, event } => {
            Ok((handle_stream_event(store, stream_id, event), None))
        }
        ChatAction::CancelStreaming => Ok((handle_cancel(store), None)),
        ChatAction::NewConversation { reasoning_enabled } => {
            let id = store.create_conversation(reasoning_enabled);
            Ok((vec![ChatUpdate::ConversationCreated { conversation: id }], None))
        }
        ChatAction::SwitchConversation { id } => {
            store.switch_conversation(id)?;
            Ok((
                vec![ChatUpdate::ConversationSwitched { conversation: id }],
                None,
            ))
        }
        ChatAction::DeleteConversation { id } => {
            store.delete_conversation(id)?;
            Ok((
                vec![ChatUpdate::ConversationDeleted { conversation: id }],
                None,
            ))
        }
    }
}

fn handle_stream_event(
    store: &mut ChatStore,
    stream_id: u64,
    event: StreamEvent,
) -> Vec<ChatUpdate> {
    let Some(conversation) = store.streaming_conversation_mut(stream_id) else {
        // Stale id: the stream finished or was cancelled while this event
        // was still in flight.
        debug!(stream_id, "dropping event for unknown stream");
        return Vec::new();
    };
    let conversation_id = conversation.id;

    let Some(session) = conversation.session_mut() else {
        return Vec::new();
    };
    let message_id = session.message_id();
    let Some(update) = session.apply(event) else {
        return Vec::new();
    };

    match update {
        SessionUpdate::Channel(channel) => {
            conversation.mirror_channel(channel);
            vec![ChatUpdate::ChannelUpdated {
                conversation: conversation_id,
                message: message_id,
                channel,
            }]
        }
        SessionUpdate::Table => {
            conversation.mirror_table();
            vec![ChatUpdate::TableUpdated {
                conversation: conversation_id,
                message: message_id,
            }]
        }
        SessionUpdate::Chart => {
            conversation.mirror_chart();
            vec![ChatUpdate::ChartUpdated {
                conversation: conversation_id,
                message: message_id,
            }]
        }
        SessionUpdate::Done | SessionUpdate::Error(_) => match conversation.finish_stream() {
            Some((message, end)) => vec![ChatUpdate::StreamFinished {
                conversation: conversation_id,
                message,
                outcome: outcome_from(end),
            }],
            None => Vec::new(),
        },
    }
}

fn handle_cancel(store: &mut ChatStore) -> Vec<ChatUpdate> {
    let Some(active_id) = store.active_id() else {
        return Vec::new();
    };
    let Some(conversation) = store.conversation_mut(active_id) else {
        return Vec::new();
    };
    let Some(session) = conversation.session_mut() else {
        // Nothing in flight; cancel after completion is a no-op.
        return Vec::new();
    };
    if !session.mark_cancelled() {
        return Vec::new();
    }

    let conversation_id = conversation.id;
    match conversation.finish_stream() {
        Some((message, end)) => vec![ChatUpdate::StreamFinished {
            conversation: conversation_id,
            message,
            outcome: outcome_from(end),
        }],
        None => Vec::new(),
    }
}

fn outcome_from(end: SessionEnd) -> StreamOutcome {
    match end {
        SessionEnd::Done => StreamOutcome::Done,
        SessionEnd::Error(message) => StreamOutcome::Error(message),
        SessionEnd::Cancelled => StreamOutcome::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::Role;

    fn submit(store: &mut ChatStore, text: &str) -> OpenStream {
        let (_, command) = apply_action(
            store,
            ChatAction::SubmitMessage {
                text: text.to_string(),
            },
        )
        .expect("submit");
        match command {
            Some(ChatCommand::OpenStream(open)) => open,
            None => panic!("expected an open-stream command"),
        }
    }

    fn feed(store: &mut ChatStore, stream_id: u64, event: StreamEvent) -> Vec<ChatUpdate> {
        let (updates, command) =
            apply_action(store, ChatAction::StreamEvent { stream_id, event }).expect("event");
        assert!(command.is_none());
        updates
    }

    fn assistant_content(store: &ChatStore, open: &OpenStream) -> String {
        let conversation = store.conversation(open.conversation).expect("conversation");
        let message = conversation.message(open.message).expect("message");
        message.content.clone()
    }

    #[test]
    fn deltas_flow_into_the_placeholder_and_done_finalizes() {
        let mut store = ChatStore::new();
        store.set_default_reasoning(true);
        let open = submit(&mut store, "hello");

        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Reasoning("Thinking".to_string()),
        );
        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Content("Hi".to_string()),
        );
        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Content(" there".to_string()),
        );
        let updates = feed(
            &mut store,
            open.stream_id,
            StreamEvent::Done {
                reasoning: None,
                content: None,
            },
        );

        assert_eq!(
            updates,
            vec![ChatUpdate::StreamFinished {
                conversation: open.conversation,
                message: open.message,
                outcome: StreamOutcome::Done,
            }]
        );

        let conversation = store.conversation(open.conversation).expect("conversation");
        assert!(!conversation.is_streaming());
        let message = conversation.message(open.message).expect("message");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "Hi there");
        assert_eq!(message.reasoning.as_deref(), Some("Thinking"));
        assert!(!message.pending);
        assert!(message.error.is_none());
    }

    #[test]
    fn explicit_finals_override_the_delta_sum() {
        let mut store = ChatStore::new();
        let open = submit(&mut store, "hello");

        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Content("draft".to_string()),
        );
        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Done {
                reasoning: None,
                content: Some("the real answer".to_string()),
            },
        );

        assert_eq!(assistant_content(&store, &open), "the real answer");
    }

    #[test]
    fn error_keeps_partial_text_and_attaches_the_message() {
        let mut store = ChatStore::new();
        let open = submit(&mut store, "hello");

        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Content("Hel".to_string()),
        );
        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Content("lo".to_string()),
        );
        let updates = feed(
            &mut store,
            open.stream_id,
            StreamEvent::Error("backend exploded".to_string()),
        );

        assert!(matches!(
            updates.as_slice(),
            [ChatUpdate::StreamFinished {
                outcome: StreamOutcome::Error(_),
                ..
            }]
        ));

        let conversation = store.conversation(open.conversation).expect("conversation");
        let message = conversation.message(open.message).expect("message");
        assert_eq!(message.content, "Hello");
        assert_eq!(message.error.as_deref(), Some("backend exploded"));
        assert!(!message.pending);
        assert!(!conversation.is_streaming());
    }

    #[test]
    fn cancel_commits_partial_text_without_data_loss() {
        let mut store = ChatStore::new();
        let open = submit(&mut store, "hello");

        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Content("so far".to_string()),
        );
        let (updates, _) = apply_action(&mut store, ChatAction::CancelStreaming).expect("cancel");

        assert_eq!(
            updates,
            vec![ChatUpdate::StreamFinished {
                conversation: open.conversation,
                message: open.message,
                outcome: StreamOutcome::Cancelled,
            }]
        );
        assert!(open.cancel.is_cancelled());

        let conversation = store.conversation(open.conversation).expect("conversation");
        let message = conversation.message(open.message).expect("message");
        assert_eq!(message.content, "so far");
        assert!(!message.pending);
        assert!(message.error.is_none());
    }

    #[test]
    fn at_most_one_terminal_transition() {
        let mut store = ChatStore::new();
        let open = submit(&mut store, "hello");

        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Content("answer".to_string()),
        );
        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Done {
                reasoning: None,
                content: None,
            },
        );

        // Cancel after done: no further transition, no mutation.
        let (updates, _) = apply_action(&mut store, ChatAction::CancelStreaming).expect("cancel");
        assert!(updates.is_empty());
        assert_eq!(assistant_content(&store, &open), "answer");

        // A late done for the finished stream is dropped too.
        let updates = feed(
            &mut store,
            open.stream_id,
            StreamEvent::Done {
                reasoning: None,
                content: Some("other".to_string()),
            },
        );
        assert!(updates.is_empty());
        assert_eq!(assistant_content(&store, &open), "answer");
    }

    #[test]
    fn done_racing_after_cancel_is_a_no_op() {
        let mut store = ChatStore::new();
        let open = submit(&mut store, "hello");

        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Content("partial".to_string()),
        );
        apply_action(&mut store, ChatAction::CancelStreaming).expect("cancel");

        let updates = feed(
            &mut store,
            open.stream_id,
            StreamEvent::Done {
                reasoning: None,
                content: Some("would overwrite".to_string()),
            },
        );
        assert!(updates.is_empty());
        assert_eq!(assistant_content(&store, &open), "partial");
    }

    #[test]
    fn stale_stream_ids_are_dropped() {
        let mut store = ChatStore::new();
        let open = submit(&mut store, "hello");

        let updates = feed(
            &mut store,
            open.stream_id + 100,
            StreamEvent::Content("ghost".to_string()),
        );
        assert!(updates.is_empty());
        assert_eq!(assistant_content(&store, &open), "");
    }

    #[test]
    fn submit_while_streaming_is_rejected() {
        let mut store = ChatStore::new();
        submit(&mut store, "first");

        let err = apply_action(
            &mut store,
            ChatAction::SubmitMessage {
                text: "second".to_string(),
            },
        )
        .expect_err("must reject");
        assert_eq!(err, ChatError::StreamInFlight);
    }

    #[test]
    fn structured_payloads_land_on_the_message() {
        use crate::api::{ChartKind, ChartPayload, TablePayload};

        let mut store = ChatStore::new();
        let open = submit(&mut store, "top products as a chart");

        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Sql("SELECT name FROM products".to_string()),
        );
        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Table(TablePayload {
                columns: vec!["name".to_string()],
                rows: vec![],
                raw: vec![],
            }),
        );
        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Chart(ChartPayload {
                kind: ChartKind::Bar,
                title: "Top products".to_string(),
                data: vec![],
                x_field: None,
                y_field: None,
                series_field: None,
            }),
        );
        feed(
            &mut store,
            open.stream_id,
            StreamEvent::Done {
                reasoning: None,
                content: None,
            },
        );

        let conversation = store.conversation(open.conversation).expect("conversation");
        let message = conversation.message(open.message).expect("message");
        assert_eq!(message.sql.as_deref(), Some("SELECT name FROM products"));
        assert!(message.table.is_some());
        assert_eq!(
            message.chart.as_ref().map(|chart| chart.kind),
            Some(ChartKind::Bar)
        );
    }
}
