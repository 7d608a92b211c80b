//! Decoding of the backend's `data: `-framed reply payloads.
//!
//! The backend answers `/chat` with a sequence of JSON frames, each prefixed
//! with `data: ` and separated by blank lines, closed by a `[DONE]` sentinel.
//! The same framing is used whether the body is read at once or consumed as
//! a live stream.

use std::pin::Pin;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{Error, Result};

/// Separator between frames in a buffered payload
pub const FRAME_DELIMITER: &str = "\n\ndata: ";

/// Prefix marking a frame line
pub const FRAME_MARKER: &str = "data: ";

/// Terminal sentinel ending the reply
pub const DONE_SENTINEL: &str = "[DONE]";

/// Trailer the backend appends once the conversation is near its cap
pub const LIMIT_SENTINEL: &str = "[LIMIT_CONVERSATION]";

/// Error type code distinguishing an exhausted conversation from throttling
pub const CONVERSATION_LIMIT_CODE: &str = "ERR_CONVERSATION_LIMIT";

const RATE_LIMIT_STATUS: u64 = 429;

/// A stream of decoded text fragments
pub type FragmentStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// One decoded event frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A piece of the assistant's answer (possibly empty)
    Message(String),
    /// An in-band error reported by the backend
    Error {
        error_type: String,
        status: Option<u64>,
    },
}

impl Frame {
    /// Parse a single frame payload
    pub fn parse(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| Error::Protocol(format!("Couldn't parse frame {payload:?}: {e}")))?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = &value else {
            return Err(Error::Protocol(format!("Frame is not a JSON object: {value}")));
        };

        if map.get("action").and_then(Value::as_str) == Some("error") {
            let error_type = match map.get("type").and_then(Value::as_str) {
                Some(t) if !t.is_empty() => t.to_string(),
                _ => value.to_string(),
            };
            return Ok(Frame::Error {
                error_type,
                status: map.get("status").and_then(Value::as_u64),
            });
        }

        match map.get("message") {
            None | Some(Value::Null) => Ok(Frame::Message(String::new())),
            Some(Value::String(text)) => Ok(Frame::Message(text.clone())),
            Some(other) => Err(Error::Protocol(format!(
                "Frame `message` is not a string: {other}"
            ))),
        }
    }

    /// Turn the frame into its text, or the typed error it carries
    pub fn into_text(self) -> Result<String> {
        match self {
            Frame::Message(text) => Ok(text),
            Frame::Error { error_type, status } if status == Some(RATE_LIMIT_STATUS) => {
                if error_type == CONVERSATION_LIMIT_CODE {
                    Err(Error::ConversationLimit(error_type))
                } else {
                    Err(Error::RateLimited(error_type))
                }
            }
            Frame::Error { error_type, .. } => Err(Error::Protocol(error_type)),
        }
    }
}

fn is_sentinel(payload: &str) -> bool {
    payload.starts_with(DONE_SENTINEL) || payload.starts_with(LIMIT_SENTINEL)
}

/// Decode a complete buffered reply into its text fragments, in order
pub fn decode_full(raw: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| Error::Protocol(format!("Reply body is not UTF-8: {e}")))?;
    let body = text.trim();
    let body = body.strip_prefix(FRAME_MARKER).unwrap_or(body);

    let mut fragments = Vec::new();
    for payload in body.split(FRAME_DELIMITER) {
        let payload = payload.trim();
        if payload.is_empty() || is_sentinel(payload) {
            continue;
        }
        fragments.push(Frame::parse(payload)?.into_text()?);
    }
    Ok(fragments)
}

enum Line {
    Skip,
    Done,
    Fragment(String),
}

fn classify_line(line: &[u8]) -> Result<Line> {
    let line = std::str::from_utf8(line)
        .map_err(|e| Error::Protocol(format!("Stream line is not UTF-8: {e}")))?;
    let Some(payload) = line.strip_prefix(FRAME_MARKER) else {
        return Ok(Line::Skip);
    };
    let payload = payload.trim();
    if payload.starts_with(DONE_SENTINEL) {
        return Ok(Line::Done);
    }
    if payload.starts_with(LIMIT_SENTINEL) {
        return Ok(Line::Skip);
    }
    Frame::parse(payload)?.into_text().map(Line::Fragment)
}

/// Longest unterminated line accepted from a streamed body
const MAX_LINE_BYTES: usize = 1 << 20;

/// Accumulates body chunks and hands out complete lines
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
    /// Start of the unconsumed region
    start: usize,
}

impl LineBuffer {
    /// Append a chunk. Lines already handed out are dropped here, once per
    /// chunk.
    fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.bytes.drain(..self.start);
        self.start = 0;
        self.bytes.extend_from_slice(chunk);

        let pending = match self.bytes.iter().rposition(|&b| b == b'\n') {
            Some(pos) => self.bytes.len() - pos - 1,
            None => self.bytes.len(),
        };
        if pending > MAX_LINE_BYTES {
            return Err(Error::Protocol(format!(
                "Stream line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(())
    }

    /// Next complete line, without its terminator. Once the input is
    /// `finished`, an unterminated remainder counts as a final line.
    fn next_line(&mut self, finished: bool) -> Option<&[u8]> {
        let begin = self.start;
        let end = match self.bytes[begin..].iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.start = begin + pos + 1;
                begin + pos
            }
            None if finished && begin < self.bytes.len() => {
                self.start = self.bytes.len();
                self.bytes.len()
            }
            None => return None,
        };
        let line = &self.bytes[begin..end];
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }
}

/// Decode a live reply body line by line into text fragments.
///
/// Empty fragments are not yielded. The sequence ends at the `[DONE]`
/// sentinel or when the body ends, and stops after the first error. The
/// byte stream is dropped as soon as the returned stream finishes or is
/// dropped.
pub fn decode_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: Into<Error> + Send,
{
    stream! {
        let mut bytes = Box::pin(bytes);
        let mut lines = LineBuffer::default();

        loop {
            let finished = match bytes.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = lines.push(chunk.as_ref()) {
                        yield Err(e);
                        return;
                    }
                    false
                }
                Some(Err(e)) => {
                    yield Err(Into::<Error>::into(e));
                    return;
                }
                None => true,
            };

            while let Some(line) = lines.next_line(finished) {
                match classify_line(line) {
                    Ok(Line::Skip) => {}
                    Ok(Line::Done) => return,
                    Ok(Line::Fragment(text)) => {
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if finished {
                return;
            }
        }
    }
}
