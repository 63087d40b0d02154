//! Error types for the Dify MCP server

use dify_client::{ClientError, DemuxError, FormError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to receive a value across the bridge
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Nothing was delivered before the deadline
    #[error("no result within {} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    /// The producer went away without delivering
    #[error("producer closed without delivering a result")]
    Closed,
}

/// Why a single workflow invocation produced no usable result
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The upstream rejected the run or could not be reached
    #[error("{0}")]
    Upstream(#[from] ClientError),

    /// Reading the event stream failed
    #[error("{0}")]
    Stream(#[from] DemuxError),

    /// No terminal event arrived within the deadline
    #[error("workflow did not finish within {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the request
    #[error("invocation was cancelled")]
    Cancelled,

    /// The stream closed without a terminal event
    #[error("workflow stream ended without a result")]
    IncompleteStream,

    /// The upstream reported the run as failed
    #[error("workflow failed: {0}")]
    WorkflowFailed(String),

    /// The `files` argument is not a list of file attachments
    #[error("invalid `files` argument: {0}")]
    InvalidFiles(#[source] serde_json::Error),

    /// The invocation machinery itself broke
    #[error("internal error: {0}")]
    Internal(String),
}

/// Startup failures while building the workflow registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No credentials were supplied
    #[error("no workflow credentials configured")]
    NoCredentials,

    /// Name overrides must pair up with credentials
    #[error("{names} workflow names configured for {credentials} credentials")]
    NameCountMismatch { names: usize, credentials: usize },

    /// A client for a credential could not be created
    #[error("cannot create client for credential #{index}: {source}")]
    Client {
        index: usize,
        #[source]
        source: ClientError,
    },

    /// Fetching app info or parameters failed
    #[error("cannot fetch metadata for credential #{index}: {source}")]
    Metadata {
        index: usize,
        #[source]
        source: ClientError,
    },

    /// The app declared an input form this server cannot expose
    #[error("workflow '{name}' has an invalid input form: {source}")]
    InvalidForm {
        name: String,
        #[source]
        source: FormError,
    },

    /// The app has no name and none was configured
    #[error("workflow for credential #{index} has an empty name")]
    EmptyName { index: usize },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Configuration parsing failed
    #[error("Failed to parse configuration: {source}")]
    ParseError { source: figment::Error },

    /// Configuration validation failed
    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for key '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file format not supported
    #[error("Unsupported configuration file format: {format}")]
    UnsupportedFormat { format: String },
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::ParseError { source: error }
    }
}

/// Failures starting or running a transport
#[derive(Debug, Error)]
pub enum ServeError {
    /// The HTTP listener could not be bound
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an I/O error
    #[error("HTTP server error: {0}")]
    Io(#[from] std::io::Error),

    /// The stdio session failed to start or ended abnormally
    #[error("stdio server error: {0}")]
    Stdio(String),

    /// The server task panicked or was aborted
    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
