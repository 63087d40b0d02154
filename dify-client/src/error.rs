//! Error types for the Dify client

use thiserror::Error;

/// A single stream frame could not be turned into an event
///
/// Decode errors are reported to the stream handler and never abort the
/// stream on their own.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame payload is not JSON
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The frame payload is JSON but not an object
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The `event` field is absent or not a string
    #[error("frame has no `event` discriminator")]
    MissingDiscriminator,

    /// A known event kind carried a field of an unusable type
    #[error("malformed `{kind}` event: {source}")]
    Malformed {
        /// Discriminator of the offending event
        kind: String,
        /// Underlying deserialization failure
        #[source]
        source: serde_json::Error,
    },

    /// Pending bytes grew past the framing limit without a frame boundary
    #[error("SSE buffer exceeded {limit} bytes without a frame boundary")]
    FrameTooLarge {
        /// Configured buffer limit in bytes
        limit: usize,
    },
}

/// Failure signalled by a [`StreamHandler`](crate::StreamHandler) callback
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Fatal failures of a demultiplexed stream
#[derive(Debug, Error)]
pub enum DemuxError {
    /// A handler callback failed; reading stopped at that event
    #[error("stream handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// The underlying byte stream failed
    #[error("stream transport failed: {0}")]
    Transport(String),
}

/// Errors talking to the Dify service API
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection, timeout or body read failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("Dify API returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Dify error code, when the body carried one
        code: Option<String>,
        /// Error message from the body, or the raw body
        message: String,
    },

    /// The configured base URL cannot be used
    #[error("invalid base URL '{url}': {source}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// Parser failure
        #[source]
        source: url::ParseError,
    },

    /// A response body did not match the expected shape
    #[error("invalid response body: {0}")]
    Json(#[from] serde_json::Error),
}

/// A `user_input_form` that cannot be turned into typed input fields
#[derive(Debug, Error)]
pub enum FormError {
    /// The form itself must be a list of entries
    #[error("input form must be a list, found {found}")]
    NotAList {
        /// JSON type of the form
        found: &'static str,
    },

    /// Every entry must be an object
    #[error("input form entry #{index} must be an object, found {found}")]
    NotAnObject {
        /// Position in the form
        index: usize,
        /// JSON type of the entry
        found: &'static str,
    },

    /// Entries must be objects with exactly one key naming the control kind
    #[error("input form entry #{index} must have exactly one control kind, found {found}")]
    AmbiguousEntry {
        /// Position in the form
        index: usize,
        /// Number of keys found
        found: usize,
    },

    /// The control kind is not one this server can expose
    #[error("input form entry #{index} has unsupported kind '{kind}'")]
    UnsupportedKind {
        /// Position in the form
        index: usize,
        /// The control kind
        kind: String,
    },

    /// The control has no `variable` name
    #[error("input form entry #{index} ('{kind}') has no variable name")]
    MissingVariable {
        /// Position in the form
        index: usize,
        /// The control kind
        kind: String,
    },

    /// The control body has fields of the wrong type
    #[error("input form entry #{index} ('{kind}') is malformed: {source}")]
    Malformed {
        /// Position in the form
        index: usize,
        /// The control kind
        kind: String,
        /// Underlying deserialization failure
        #[source]
        source: serde_json::Error,
    },
}
