//! Incremental framing for the streaming chat wire protocol.
//!
//! The transport hands us arbitrary byte chunks; frame boundaries and even
//! UTF-8 sequences can land anywhere. [`Utf8StreamDecoder`] and
//! [`EventFramer`] carry the partial tail of each chunk forward so that the
//! frame sequence is identical no matter how the stream was split.

use memchr::memchr;
use serde::{Deserialize, Serialize};

/// Wire framing used by the streaming chat endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramingMode {
    /// Newline-delimited `data: <payload>` lines; other lines are ignored.
    DataLines,
    /// `event: <name>` plus one or more `data: <fragment>` lines, terminated
    /// by a blank line. Fragments are newline-joined into one payload.
    NamedEvents,
}

/// One complete, self-delimited protocol frame, before type decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event name for named-event framing; `None` under data-line framing.
    pub event: Option<String>,
    pub data: String,
}

/// Streaming UTF-8 decoder tolerant of multi-byte sequences split across
/// chunk boundaries: an incomplete trailing sequence is held back and
/// prefixed to the next chunk, invalid bytes are replaced.
#[derive(Default)]
pub struct Utf8StreamDecoder {
    carry: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut input = buf.as_slice();
        while !input.is_empty() {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    out.push_str(text);
                    input = &[];
                }
                Err(err) => {
                    let (valid, tail) = input.split_at(err.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        out.push_str(text);
                    }
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &tail[len..];
                        }
                        None => {
                            // Incomplete trailing sequence: wait for the rest.
                            self.carry = tail.to_vec();
                            input = &[];
                        }
                    }
                }
            }
        }
        out
    }
}

/// Incremental framer: feed decoded text chunks in, get complete frames out.
///
/// A partial trailing line is carried to the next chunk, never emitted early.
/// Content still buffered at end-of-stream is discarded: termination is
/// signalled by an explicit terminal frame, not by EOF.
pub struct EventFramer {
    mode: FramingMode,
    line_carry: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl EventFramer {
    pub fn new(mode: FramingMode) -> Self {
        EventFramer {
            mode,
            line_carry: String::new(),
            event: None,
            data_lines: Vec::new(),
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Consume one text chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.line_carry.push_str(chunk);

        while let Some(pos) = memchr(b'\n', self.line_carry.as_bytes()) {
            let line: String = self.line_carry.drain(..=pos).collect();
            self.accept_line(line.trim_end_matches(['\n', '\r']), &mut frames);
        }
        frames
    }

    fn accept_line(&mut self, line: &str, frames: &mut Vec<Frame>) {
        match self.mode {
            FramingMode::DataLines => {
                if let Some(payload) = line.trim().strip_prefix("data:") {
                    frames.push(Frame {
                        event: None,
                        data: payload.trim_start().to_string(),
                    });
                }
            }
            FramingMode::NamedEvents => {
                if let Some(name) = line.strip_prefix("event:") {
                    // A new event line closes any frame still open.
                    self.flush_pending(frames);
                    self.event = Some(name.trim().to_string());
                } else if let Some(fragment) = line.strip_prefix("data:") {
                    self.data_lines
                        .push(fragment.strip_prefix(' ').unwrap_or(fragment).to_string());
                } else if line.is_empty() {
                    self.flush_pending(frames);
                }
                // Anything else (comments, unknown fields) is ignored.
            }
        }
    }

    fn flush_pending(&mut self, frames: &mut Vec<Frame>) {
        let event = self.event.take();
        let data_lines = std::mem::take(&mut self.data_lines);
        if let Some(event) = event {
            if !data_lines.is_empty() {
                frames.push(Frame {
                    event: Some(event),
                    data: data_lines.join("\n"),
                });
            }
        }
    }
}
