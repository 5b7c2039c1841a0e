//! Server-Sent Events framing for the push channel.
//!
//! # SSE Format
//!
//! Each pushed request is one event:
//! ```text
//! id: 7
//! data: {"jsonrpc":"2.0","id":7,"method":"sampling/createMessage","params":{...}}
//!
//! : keep-alive
//!
//! ```
//!
//! Network chunks do not respect line boundaries, so [`FrameDecoder`]
//! buffers partial lines and only emits an event at the blank line that
//! terminates it. Multiple `data:` lines in one event are joined with `\n`.

use axum::response::sse::Event;

use crate::error::Result;
use crate::protocol::RequestEnvelope;

/// A single parsed SSE line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// `field: value`
    Field {
        /// Field name
        name: String,
        /// Value with one leading space removed
        value: String,
    },
    /// Comment or keep-alive
    Comment(String),
    /// Blank line, terminates an event
    Blank,
}

/// Parse one line (without its terminator)
pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.strip_suffix('\r').unwrap_or(line);

    if line.is_empty() {
        return SseLine::Blank;
    }

    if let Some(comment) = line.strip_prefix(':') {
        return SseLine::Comment(comment.trim().to_string());
    }

    let (name, value) = match line.split_once(':') {
        Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
        None => (line, ""),
    };
    SseLine::Field {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// A complete event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// `event:` field
    pub event: Option<String>,
    /// `id:` field
    pub id: Option<String>,
    /// Joined `data:` lines
    pub data: String,
}

impl SseFrame {
    /// Whether this is a plain message event
    pub fn is_message(&self) -> bool {
        self.event.as_deref().map_or(true, |e| e == "message")
    }
}

/// Incremental SSE decoder
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk, returning every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            if let Some(frame) = self.apply(parse_sse_line(&line)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush at end of stream. An event without its terminating blank line
    /// is still returned if it carried data.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.apply(parse_sse_line(&line)) {
                return Some(frame);
            }
        }
        self.apply(SseLine::Blank)
    }

    fn apply(&mut self, line: SseLine) -> Option<SseFrame> {
        match line {
            SseLine::Blank => {
                if self.data.is_empty() {
                    self.event = None;
                    return None;
                }
                Some(SseFrame {
                    event: self.event.take(),
                    id: self.id.clone(),
                    data: std::mem::take(&mut self.data).join("\n"),
                })
            },
            SseLine::Comment(_) => None,
            SseLine::Field { name, value } => {
                match name.as_str() {
                    "data" => self.data.push(value),
                    "event" => self.event = Some(value),
                    "id" => self.id = Some(value),
                    _ => {},
                }
                None
            },
        }
    }
}

/// Encode a request envelope as an SSE event
pub fn encode_request(envelope: &RequestEnvelope) -> Result<Event> {
    let json = envelope.to_json()?;
    Ok(Event::default().id(envelope.id.to_string()).data(json))
}
