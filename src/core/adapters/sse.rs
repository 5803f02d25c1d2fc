//! Server-sent-events framing shared by every vendor adapter.
//!
//! Bytes arrive in arbitrary chunks. [`LineBuffer`] reassembles complete
//! lines, [`SseReader`] extracts `data:` payloads and hands them to a
//! vendor [`StreamDecoder`], and [`event_stream`] exposes the whole pipeline
//! as a [`DeltaStream`].

use std::collections::VecDeque;
use std::fmt;

use futures_util::{stream, Stream, StreamExt};
use tracing::warn;

use super::{DeltaStream, StreamEvent};
use crate::core::error::ChatError;

const PAYLOAD_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator (`\n` or `\r\n`).
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let newline = memchr::memchr(b'\n', &self.buffer)?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Trailing bytes of a body that did not end with a newline, minus a
    /// stray `\r`.
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

/// Outcome of decoding one payload. Events are delivered before `failure`.
#[derive(Debug, Default)]
pub struct DecodeStep {
    pub events: Vec<StreamEvent>,
    pub done: bool,
    pub failure: Option<ChatError>,
}

impl DecodeStep {
    pub fn events(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    pub fn failed(events: Vec<StreamEvent>, failure: ChatError) -> Self {
        Self {
            events,
            done: true,
            failure: Some(failure),
        }
    }
}

pub trait StreamDecoder: Send + 'static {
    fn decode_payload(&mut self, payload: &str) -> Result<DecodeStep, ChatError>;
}

/// Value of a `data:` field. One space after the colon is dropped; every
/// other byte belongs to the payload.
pub fn extract_data_payload(line: &str) -> Option<&str> {
    let value = line.strip_prefix("data:")?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

/// Maps a payload that did not fit the vendor's chunk shape to an error.
/// JSON error envelopes are vendor rejections; anything else is undecodable.
pub fn undecodable_payload(payload: &str, err: serde_json::Error) -> ChatError {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) {
        if value.get("error").is_some() {
            return ChatError::vendor_rejected(None, payload);
        }
    }
    let preview: String = payload.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
    ChatError::decode(format!("Malformed stream chunk ({err}): {preview}"))
}

pub struct SseReader<D> {
    lines: LineBuffer,
    decoder: D,
    done: bool,
}

impl<D: StreamDecoder> SseReader<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            lines: LineBuffer::default(),
            decoder,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, bytes: &[u8], out: &mut VecDeque<Result<StreamEvent, ChatError>>) {
        if self.done {
            return;
        }
        self.lines.push(bytes);
        while !self.done {
            let Some(line) = self.lines.next_line() else {
                break;
            };
            self.process_line(&line, out);
        }
    }

    /// Flushes an unterminated final line once the body ends.
    pub fn finish(&mut self, out: &mut VecDeque<Result<StreamEvent, ChatError>>) {
        if !self.done {
            if let Some(rest) = self.lines.take_remainder() {
                self.process_line(&rest, out);
            }
        }
        self.done = true;
    }

    fn process_line(&mut self, line: &[u8], out: &mut VecDeque<Result<StreamEvent, ChatError>>) {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "skipping stream line with invalid UTF-8");
                return;
            }
        };
        let Some(payload) = extract_data_payload(text) else {
            return;
        };
        if payload.is_empty() {
            return;
        }

        let step = match self.decoder.decode_payload(payload) {
            Ok(step) => step,
            Err(err) => DecodeStep::failed(Vec::new(), err),
        };
        out.extend(
            step.events
                .into_iter()
                .filter(|event| !event.is_empty_text())
                .map(Ok),
        );
        if let Some(failure) = step.failure {
            out.push_back(Err(failure));
            self.done = true;
        }
        if step.done {
            self.done = true;
        }
    }
}

/// Decodes a complete body in one pass.
pub fn decode_all<D: StreamDecoder>(body: &[u8], decoder: D) -> Vec<Result<StreamEvent, ChatError>> {
    let mut reader = SseReader::new(decoder);
    let mut out = VecDeque::new();
    reader.feed(body, &mut out);
    reader.finish(&mut out);
    out.into()
}

struct EventStreamState<S, D> {
    bytes: S,
    reader: SseReader<D>,
    pending: VecDeque<Result<StreamEvent, ChatError>>,
    exhausted: bool,
}

/// Turns a raw byte stream into normalized events. Stops after the vendor's
/// end marker or the first error.
pub fn event_stream<S, B, E, D>(bytes: S, decoder: D) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
    E: fmt::Display + Send,
    D: StreamDecoder,
{
    let state = EventStreamState {
        bytes,
        reader: SseReader::new(decoder),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.exhausted {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.reader.feed(chunk.as_ref(), &mut state.pending),
                Some(Err(err)) => {
                    state
                        .pending
                        .push_back(Err(ChatError::network(format!("Stream interrupted: {err}"))));
                    state.exhausted = true;
                }
                None => {
                    state.reader.finish(&mut state.pending);
                    state.exhausted = true;
                }
            }
            if state.reader.is_done() {
                state.exhausted = true;
            }
        }
    })
    .boxed()
}
