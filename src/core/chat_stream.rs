//! Transport driver: runs one streaming chat request and forwards decoded
//! events to the state machine over a channel.
//!
//! The service owns no state beyond the sender; each request runs in its own
//! task, tagged with its stream id so that stale events from a replaced or
//! cancelled stream can be told apart on the receiving side.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::ChatRequest;
use crate::core::config::EofPolicy;
use crate::core::event::{decode_frame, StreamEvent};
use crate::core::framing::{EventFramer, FramingMode, Utf8StreamDecoder};
use crate::utils::url::construct_api_url;

pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub request: ChatRequest,
    pub framing: FramingMode,
    pub eof_policy: EofPolicy,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamEvent, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamEvent, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                base_url,
                request,
                framing,
                eof_policy,
                cancel_token,
                stream_id,
            } = params;

            tokio::select! {
                _ = async {
                    let chat_url = construct_api_url(&base_url, "chat");
                    let http_request = client
                        .post(chat_url)
                        .header("Accept", "text/event-stream")
                        .json(&request);

                    match http_request.send().await {
                        Ok(response) => {
                            if !response.status().is_success() {
                                let error_text = response
                                    .text()
                                    .await
                                    .unwrap_or_else(|_| "<no body>".to_string());
                                let _ = tx.send((
                                    StreamEvent::Error(format_api_error(&error_text)),
                                    stream_id,
                                ));
                                return;
                            }

                            pump_frames(
                                response.bytes_stream(),
                                framing,
                                eof_policy,
                                &cancel_token,
                                &tx,
                                stream_id,
                            )
                            .await;
                        }
                        Err(err) => {
                            let _ = tx.send((
                                StreamEvent::Error(format_api_error(&err.to_string())),
                                stream_id,
                            ));
                        }
                    }
                } => {}
                _ = cancel_token.cancelled() => {}
            }
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, event: StreamEvent, stream_id: u64) {
        let _ = self.tx.send((event, stream_id));
    }
}

/// Drive one response body through the framer and decoder, forwarding every
/// decoded event. Returns after the first terminal event, on cancellation,
/// or at EOF; the EOF policy decides what an unterminated stream means.
pub(crate) async fn pump_frames<S, B, E>(
    mut stream: S,
    framing: FramingMode,
    eof_policy: EofPolicy,
    cancel_token: &CancellationToken,
    tx: &mpsc::UnboundedSender<(StreamEvent, u64)>,
    stream_id: u64,
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut decoder = Utf8StreamDecoder::new();
    let mut framer = EventFramer::new(framing);

    while let Some(chunk) = stream.next().await {
        if cancel_token.is_cancelled() {
            return;
        }

        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = tx.send((
                    StreamEvent::Error(format_api_error(&err.to_string())),
                    stream_id,
                ));
                return;
            }
        };

        let text = decoder.decode(chunk.as_ref());
        for frame in framer.push(&text) {
            if let Some(event) = decode_frame(framing, &frame) {
                let terminal = event.is_terminal();
                let _ = tx.send((event, stream_id));
                if terminal {
                    return;
                }
            }
        }
    }

    // The stream closed without a terminal frame.
    let event = match eof_policy {
        EofPolicy::ImplicitDone => StreamEvent::Done {
            reasoning: None,
            content: None,
        },
        EofPolicy::Error => {
            StreamEvent::Error("stream closed before a terminal event".to_string())
        }
    };
    let _ = tx.send((event, stream_id));
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

pub(crate) fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
                }
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{}\n```", trimmed)
    } else {
        format!("API Error:\n```\n{}\n```", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    async fn pump_chunks(
        framing: FramingMode,
        eof_policy: EofPolicy,
        chunks: Vec<&str>,
    ) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let stream = futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, Infallible>(chunk.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        );
        pump_frames(stream, framing, eof_policy, &cancel, &tx, 1).await;

        let mut events = Vec::new();
        while let Ok((event, stream_id)) = rx.try_recv() {
            assert_eq!(stream_id, 1);
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn forwards_decoded_events_until_done() {
        let events = pump_chunks(
            FramingMode::DataLines,
            EofPolicy::ImplicitDone,
            vec![
                "data: {\"type\":\"reasoning\",\"data\":\"think\"}\n\n",
                "data: {\"type\":\"content\",\"data\":\"Hi\"}\n\n",
                "data: {\"type\":\"done\"}\n\n",
                "data: {\"type\":\"content\",\"data\":\"after the end\"}\n\n",
            ],
        )
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Reasoning("think".to_string()),
                StreamEvent::Content("Hi".to_string()),
                StreamEvent::Done {
                    reasoning: None,
                    content: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn malformed_frames_do_not_stop_the_stream() {
        let events = pump_chunks(
            FramingMode::DataLines,
            EofPolicy::ImplicitDone,
            vec![
                "data: {\"type\":\"content\",\"data\":\"one\"}\n",
                "data: {broken\n",
                "data: {\"type\":\"content\",\"data\":\"two\"}\n",
                "data: {\"type\":\"done\"}\n",
            ],
        )
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Content("one".to_string()),
                StreamEvent::Content("two".to_string()),
                StreamEvent::Done {
                    reasoning: None,
                    content: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn events_survive_arbitrary_chunk_splits() {
        let wire = "event: text\ndata: Hello\n\nevent: done\ndata: {}\n\n";
        let whole = pump_chunks(
            FramingMode::NamedEvents,
            EofPolicy::ImplicitDone,
            vec![wire],
        )
        .await;

        for split in 1..wire.len() {
            let events = pump_chunks(
                FramingMode::NamedEvents,
                EofPolicy::ImplicitDone,
                vec![&wire[..split], &wire[split..]],
            )
            .await;
            assert_eq!(events, whole, "split at byte {split}");
        }
    }

    #[tokio::test]
    async fn eof_policy_decides_the_unterminated_outcome() {
        let chunks = vec!["event: text\ndata: partial\n\n"];

        let implicit = pump_chunks(
            FramingMode::NamedEvents,
            EofPolicy::ImplicitDone,
            chunks.clone(),
        )
        .await;
        assert_eq!(implicit.len(), 2);
        assert!(matches!(implicit[1], StreamEvent::Done { .. }));

        let strict = pump_chunks(FramingMode::NamedEvents, EofPolicy::Error, chunks).await;
        assert_eq!(strict.len(), 2);
        assert!(matches!(strict[1], StreamEvent::Error(_)));
    }

    #[tokio::test]
    async fn cancelled_token_stops_chunk_processing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream = futures_util::stream::iter(vec![Ok::<_, Infallible>(
            b"data: {\"type\":\"content\",\"data\":\"late\"}\n".to_vec(),
        )]);

        pump_frames(
            stream,
            FramingMode::DataLines,
            EofPolicy::ImplicitDone,
            &cancel,
            &tx,
            9,
        )
        .await;

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn format_api_error_prettifies_json_with_summary() {
        let raw = r#"{"error":{"message":"model overloaded","type":"invalid_request_error"}}"#;
        let formatted = format_api_error(raw);

        let expected = r#"API Error: model overloaded
```json
{
  "error": {
    "message": "model overloaded",
    "type": "invalid_request_error"
  }
}
```"#;
        assert_eq!(formatted, expected);
    }

    #[test]
    fn format_api_error_handles_xml_and_plaintext() {
        assert_eq!(
            format_api_error("<error>bad</error>"),
            "API Error:\n```xml\n<error>bad</error>\n```"
        );
        assert_eq!(
            format_api_error("api failure"),
            "API Error:\n```\napi failure\n```"
        );
        assert_eq!(format_api_error("   "), "API Error:\n```\n<empty>\n```");
    }
}
