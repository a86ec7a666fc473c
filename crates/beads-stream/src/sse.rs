//! Server-sent event framing
//!
//! Incremental decoder for the `text/event-stream` format. Chunks may split
//! lines or frames anywhere; complete frames are returned as soon as their
//! terminating blank line arrives. A line longer than the decoder's limit
//! fails the stream instead of buffering without bound.

use crate::error::StreamError;

/// Default cap on one pending line
pub const DEFAULT_MAX_LINE_BYTES: usize = 1 << 20;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Event label (`event:` field), `None` for the default `message` event
    pub event: Option<String>,
    /// Data lines joined with `\n`
    pub data: String,
    /// Last event id seen on the stream
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    max_line: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            last_id: None,
            max_line: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl SseDecoder {
    /// Create empty decoder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a different cap on one pending line
    #[inline]
    #[must_use]
    pub fn with_max_line(mut self, bytes: usize) -> Self {
        self.max_line = bytes;
        self
    }

    /// Feed a chunk, returning every frame it completes
    ///
    /// # Errors
    /// `StreamError::LineTooLong` once an unterminated line exceeds the cap;
    /// the partial frame is discarded
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, StreamError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        if self.buffer.len() > self.max_line {
            self.buffer = Vec::new();
            self.event = None;
            self.data.clear();
            return Err(StreamError::LineTooLong(self.max_line));
        }
        Ok(frames)
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            "id" => self.last_id = Some(value.to_owned()),
            // `retry` is ignored: reconnection timing is ours
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event: event.filter(|e| !e.is_empty()),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.last_id.clone(),
        })
    }
}
