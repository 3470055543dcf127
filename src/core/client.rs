//! Client facade: wires the store, the transport service, and the update
//! channel together for a host UI.

use tokio::sync::mpsc;
use tracing::warn;

use crate::api::ChatRequest;
use crate::core::actions::{apply_action, ChatAction, ChatCommand, ChatUpdate};
use crate::core::chat_stream::{ChatStreamService, StreamParams};
use crate::core::config::Config;
use crate::core::conversation::{ChatStore, ConversationId, OpenStream};
use crate::core::error::ChatError;
use crate::core::event::StreamEvent;
use crate::core::framing::FramingMode;
use crate::utils::transcript::TranscriptLog;

pub struct ChatClient {
    store: ChatStore,
    config: Config,
    http: reqwest::Client,
    service: ChatStreamService,
    rx: mpsc::UnboundedReceiver<(StreamEvent, u64)>,
    transcript: TranscriptLog,
}

impl ChatClient {
    pub fn new(config: Config) -> Self {
        let (service, rx) = ChatStreamService::new();
        let mut store = ChatStore::new();
        store.set_default_reasoning(config.reasoning_enabled());
        let transcript = TranscriptLog::new(config.transcript_log.clone());

        ChatClient {
            store,
            config,
            http: reqwest::Client::new(),
            service,
            rx,
            transcript,
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Dispatch a user turn on the active conversation, creating one if none
    /// is selected, and open the streaming request for it. Returns the new
    /// stream id.
    pub fn send_message(&mut self, text: &str) -> Result<u64, ChatError> {
        let (_, command) = apply_action(
            &mut self.store,
            ChatAction::SubmitMessage {
                text: text.to_string(),
            },
        )?;
        let Some(ChatCommand::OpenStream(open)) = command else {
            unreachable!("submit without an open-stream command");
        };

        if let Err(err) = self.transcript.log_message(&format!("user: {text}")) {
            warn!(%err, "failed to write transcript");
        }

        let stream_id = open.stream_id;
        let params = self.stream_params(open);
        self.service.spawn_stream(params);
        Ok(stream_id)
    }

    /// Cancel the active conversation's in-flight response. Idempotent: when
    /// nothing is streaming this returns no updates.
    pub fn cancel(&mut self) -> Vec<ChatUpdate> {
        match apply_action(&mut self.store, ChatAction::CancelStreaming) {
            Ok((updates, _)) => {
                self.log_finished_turns(&updates);
                updates
            }
            Err(_) => Vec::new(),
        }
    }

    /// Drain every event the transport has delivered so far, apply them, and
    /// return the resulting updates. Consecutive text deltas for the same
    /// stream and channel are coalesced before application.
    pub fn poll_updates(&mut self) -> Vec<ChatUpdate> {
        let mut events: Vec<(StreamEvent, u64)> = Vec::new();
        while let Ok(pair) = self.rx.try_recv() {
            push_coalesced(&mut events, pair);
        }
        self.apply_events(events)
    }

    /// Await at least one transport event, then drain whatever else already
    /// arrived. Suspends only between chunks, never mid-application.
    pub async fn next_updates(&mut self) -> Option<Vec<ChatUpdate>> {
        let first = self.rx.recv().await?;
        let mut events = Vec::new();
        push_coalesced(&mut events, first);
        while let Ok(pair) = self.rx.try_recv() {
            push_coalesced(&mut events, pair);
        }
        Some(self.apply_events(events))
    }

    pub fn new_conversation(&mut self, reasoning_enabled: bool) -> ConversationId {
        self.store.create_conversation(reasoning_enabled)
    }

    pub fn switch_conversation(&mut self, id: ConversationId) -> Result<(), ChatError> {
        apply_action(&mut self.store, ChatAction::SwitchConversation { id }).map(|_| ())
    }

    pub fn delete_conversation(&mut self, id: ConversationId) -> Result<(), ChatError> {
        apply_action(&mut self.store, ChatAction::DeleteConversation { id }).map(|_| ())
    }

    fn apply_events(&mut self, events: Vec<(StreamEvent, u64)>) -> Vec<ChatUpdate> {
        let mut updates = Vec::new();
        for (event, stream_id) in events {
            if let Ok((batch, _)) =
                apply_action(&mut self.store, ChatAction::StreamEvent { stream_id, event })
            {
                updates.extend(batch);
            }
        }
        self.log_finished_turns(&updates);
        updates
    }

    fn stream_params(&self, open: OpenStream) -> StreamParams {
        let request = match self.config.framing_mode() {
            FramingMode::DataLines => ChatRequest::with_history(
                open.history,
                open.conversation.to_string(),
                open.reasoning_enabled,
            ),
            FramingMode::NamedEvents => {
                ChatRequest::single_turn(open.conversation.to_string(), open.user_text)
            }
        };

        StreamParams {
            client: self.http.clone(),
            base_url: self.config.base_url().to_string(),
            request,
            framing: self.config.framing_mode(),
            eof_policy: self.config.eof_policy(),
            cancel_token: open.cancel,
            stream_id: open.stream_id,
        }
    }

    fn log_finished_turns(&self, updates: &[ChatUpdate]) {
        for update in updates {
            let ChatUpdate::StreamFinished {
                conversation,
                message,
                ..
            } = update
            else {
                continue;
            };
            let text = self
                .store
                .conversation(*conversation)
                .and_then(|conversation| conversation.message(*message))
                .map(|message| message.content.clone())
                .unwrap_or_default();
            if text.is_empty() {
                continue;
            }
            if let Err(err) = self.transcript.log_message(&text) {
                warn!(%err, "failed to write transcript");
            }
        }
    }

    /// Open a turn without spawning the transport task, so tests can feed
    /// events by hand.
    #[cfg(test)]
    pub(crate) fn begin_turn_for_test(&mut self, text: &str) -> u64 {
        let (_, command) = apply_action(
            &mut self.store,
            ChatAction::SubmitMessage {
                text: text.to_string(),
            },
        )
        .expect("submit");
        match command {
            Some(ChatCommand::OpenStream(open)) => open.stream_id,
            None => panic!("expected an open-stream command"),
        }
    }

    #[cfg(test)]
    pub(crate) fn inject_event(&mut self, event: StreamEvent, stream_id: u64) {
        self.service.send_for_test(event, stream_id);
    }
}

fn push_coalesced(events: &mut Vec<(StreamEvent, u64)>, next: (StreamEvent, u64)) {
    let (event, stream_id) = next;
    if let Some((last, last_id)) = events.last_mut() {
        if *last_id == stream_id {
            match (last, &event) {
                (StreamEvent::Content(buffer), StreamEvent::Content(text))
                | (StreamEvent::Reasoning(buffer), StreamEvent::Reasoning(text))
                | (StreamEvent::Sql(buffer), StreamEvent::Sql(text)) => {
                    buffer.push_str(text);
                    return;
                }
                _ => {}
            }
        }
    }
    events.push((event, stream_id));
}
