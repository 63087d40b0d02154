//! Stream demultiplexing
//!
//! [`StreamDemultiplexer`] reads the raw body of a streaming workflow run,
//! decodes every frame into a [`StreamEvent`] and dispatches it to the
//! matching [`StreamHandler`] callback, in network order.
//!
//! A frame that fails to decode is reported through
//! [`StreamHandler::on_error`] and skipped. A callback that returns an error
//! stops the stream at that event.

use crate::error::{DecodeError, DemuxError, HandlerError};
use crate::events::{
    ErrorEvent, MessageEndEvent, NodeFinishedEvent, StreamEvent, TtsEvent, WorkflowFinishedEvent,
};
use crate::sse::{Frame, SseFrameDecoder};
use futures::{Stream, StreamExt};
use std::fmt::Display;

/// Result of a handler callback
pub type HandlerResult = Result<(), HandlerError>;

/// Non-fatal problems seen on the stream
#[derive(Debug, Clone, Copy)]
pub enum StreamError<'a> {
    /// A frame could not be decoded
    Decode(&'a DecodeError),
    /// The upstream reported an error event
    Upstream(&'a ErrorEvent),
}

impl Display for StreamError<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Decode(e) => write!(f, "decode failure: {}", e),
            StreamError::Upstream(e) => {
                write!(f, "upstream error {} ({}): {}", e.status, e.code, e.message)
            }
        }
    }
}

/// Callbacks invoked per decoded event
///
/// Every callback defaults to a no-op so implementors only override what
/// they consume.
pub trait StreamHandler: Send {
    /// Called for every decoded event before any kind-specific callback
    fn on_event(&mut self, _event: &StreamEvent) -> HandlerResult {
        Ok(())
    }

    /// The top-level `end` node finished; its inputs are the run's output
    fn on_terminal(&mut self, _event: &NodeFinishedEvent) -> HandlerResult {
        Ok(())
    }

    /// Incremental text from `text_chunk`, `message` or `agent_message`
    fn on_message(&mut self, _text: &str) -> HandlerResult {
        Ok(())
    }

    /// A chat message completed
    fn on_message_end(&mut self, _event: &MessageEndEvent) -> HandlerResult {
        Ok(())
    }

    /// A TTS audio event arrived
    fn on_audio(&mut self, _event: &TtsEvent) -> HandlerResult {
        Ok(())
    }

    /// The run finished, successfully or not
    fn on_workflow_finished(&mut self, _event: &WorkflowFinishedEvent) -> HandlerResult {
        Ok(())
    }

    /// A frame failed to decode or the upstream sent an error event
    fn on_error(&mut self, _error: StreamError<'_>) -> HandlerResult {
        Ok(())
    }
}

/// Counters for one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Frames read off the wire
    pub frames: usize,
    /// Frames that decoded into events
    pub events: usize,
    /// Frames that failed to decode
    pub decode_failures: usize,
}

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The terminal event was observed before the stream closed
    Terminated(StreamStats),
    /// The stream closed without a terminal event
    Ended(StreamStats),
}

impl StreamOutcome {
    /// Whether the terminal event was observed
    pub fn is_terminated(&self) -> bool {
        matches!(self, StreamOutcome::Terminated(_))
    }

    /// Counters collected while reading
    pub fn stats(&self) -> StreamStats {
        match self {
            StreamOutcome::Terminated(stats) | StreamOutcome::Ended(stats) => *stats,
        }
    }
}

/// Decodes a workflow stream and dispatches events to a handler
pub struct StreamDemultiplexer<H> {
    handler: H,
    decoder: SseFrameDecoder,
    stats: StreamStats,
    terminated: bool,
}

impl<H: StreamHandler> StreamDemultiplexer<H> {
    /// Create a demultiplexer around `handler`
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            decoder: SseFrameDecoder::new(),
            stats: StreamStats::default(),
            terminated: false,
        }
    }

    /// The wrapped handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Consume the demultiplexer, returning the handler
    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Read `stream` to its end
    ///
    /// Returns [`StreamOutcome::Ended`] if the body closed without the
    /// terminal event; the caller decides what an incomplete run means.
    pub async fn run<S, B, E>(&mut self, stream: S) -> Result<StreamOutcome, DemuxError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut stream = std::pin::pin!(stream);

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| {
                tracing::debug!("Workflow stream transport error: {}", e);
                DemuxError::Transport(e.to_string())
            })?;
            for frame in self.decoder.push(chunk.as_ref()) {
                self.dispatch_frame(frame)?;
            }
        }
        if let Some(frame) = self.decoder.finish() {
            self.dispatch_frame(frame)?;
        }

        tracing::debug!(
            "Workflow stream closed: {} frames, {} events, {} decode failures, terminal={}",
            self.stats.frames,
            self.stats.events,
            self.stats.decode_failures,
            self.terminated
        );
        Ok(self.outcome())
    }

    /// Decode and dispatch one frame payload
    pub fn dispatch_frame(&mut self, frame: Frame) -> Result<(), DemuxError> {
        self.stats.frames += 1;
        match frame.and_then(|payload| StreamEvent::decode(&payload)) {
            Ok(event) => {
                self.stats.events += 1;
                self.dispatch(&event)?;
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                tracing::warn!("Skipping undecodable workflow stream frame: {}", e);
                self.handler.on_error(StreamError::Decode(&e))?;
            }
        }
        Ok(())
    }

    /// The outcome so far
    pub fn outcome(&self) -> StreamOutcome {
        if self.terminated {
            StreamOutcome::Terminated(self.stats)
        } else {
            StreamOutcome::Ended(self.stats)
        }
    }

    fn dispatch(&mut self, event: &StreamEvent) -> HandlerResult {
        tracing::trace!("Dispatching workflow stream event '{}'", event.kind());
        self.handler.on_event(event)?;

        match event {
            StreamEvent::NodeFinished(finished) if finished.is_terminal() => {
                self.terminated = true;
                self.handler.on_terminal(finished)
            }
            StreamEvent::TextChunk(chunk) => self.handler.on_message(&chunk.data.text),
            StreamEvent::Message(message) => self.handler.on_message(&message.answer),
            StreamEvent::MessageEnd(end) => self.handler.on_message_end(end),
            StreamEvent::TtsMessage(tts) | StreamEvent::TtsMessageEnd(tts) => {
                self.handler.on_audio(tts)
            }
            StreamEvent::WorkflowFinished(finished) => self.handler.on_workflow_finished(finished),
            StreamEvent::Error(error) => self.handler.on_error(StreamError::Upstream(error)),
            _ => Ok(()),
        }
    }
}
