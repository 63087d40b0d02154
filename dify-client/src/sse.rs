//! Server-sent-event framing
//!
//! Turns an arbitrary chunking of the response body into complete `data:`
//! payloads. Bytes are buffered until a newline so multi-byte characters
//! split across network reads are reassembled before decoding.

use crate::error::DecodeError;

/// Upper bound on buffered bytes without a frame boundary
pub const MAX_FRAME_BUFFER: usize = 1024 * 1024; // 1MB limit

/// A complete frame payload, or a framing failure
pub type Frame = Result<String, DecodeError>;

/// Incremental SSE decoder
#[derive(Debug)]
pub struct SseFrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a newline
    scanned: usize,
    data: Vec<String>,
    data_len: usize,
    limit: usize,
}

impl SseFrameDecoder {
    /// Create a decoder with the default buffer limit
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_BUFFER)
    }

    /// Create a decoder that gives up on frames larger than `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            data_len: 0,
            limit,
        }
    }

    /// Feed one chunk of the body, returning the frames it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut line_start = 0;
        let mut cursor = self.scanned;
        while let Some(offset) = buffer[cursor..].iter().position(|&b| b == b'\n') {
            let newline = cursor + offset;
            if let Some(frame) = self.process_line(&buffer[line_start..newline]) {
                frames.push(frame);
            }
            line_start = newline + 1;
            cursor = line_start;
        }

        // Consumed lines are removed once per chunk
        buffer.drain(..line_start);
        self.scanned = buffer.len();
        self.buffer = buffer;

        // Prevent unbounded buffer growth
        if self.buffer.len() + self.data_len > self.limit {
            tracing::warn!(
                "SSE buffer exceeded {} bytes without a frame boundary, discarding",
                self.limit
            );
            self.reset();
            frames.push(Err(DecodeError::FrameTooLarge { limit: self.limit }));
        }

        frames
    }

    /// Flush whatever is left once the body has ended
    ///
    /// The upstream does not always terminate its last event with a blank
    /// line, so a pending `data:` block is still delivered.
    pub fn finish(&mut self) -> Option<Frame> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &[u8]) -> Option<Frame> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            return self.dispatch();
        }

        let text = String::from_utf8_lossy(line);
        if text.starts_with(':') {
            // comment / keep-alive
            return None;
        }

        let (field, value) = match text.find(':') {
            Some(colon) => {
                let value = &text[colon + 1..];
                (&text[..colon], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (&text[..], ""),
        };

        if field == "data" {
            self.data_len += value.len();
            self.data.push(value.to_string());
        } else {
            tracing::trace!("Ignoring SSE field '{}'", field);
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        self.data_len = 0;
        Some(Ok(payload))
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.data.clear();
        self.data_len = 0;
    }
}

impl Default for SseFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
