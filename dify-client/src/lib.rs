//! # Dify client
//!
//! Client for the Dify service API with a typed view of the workflow event
//! stream.
//!
//! - [`events`]: the event records a streaming workflow run emits
//! - [`sse`] and [`stream`]: framing and dispatching of the raw event stream
//! - [`client`]: the HTTP operations (`/info`, `/parameters`, `/workflows/run`)
//! - [`parameters`]: the application's declared input form
//!
//! ```no_run
//! use dify_client::{build_http_client, DifyClient, WorkflowApi};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), dify_client::ClientError> {
//! let http = build_http_client(Duration::from_secs(10))?;
//! let client = DifyClient::new(http, "http://localhost/v1", "app-key")?;
//! let info = client.app_info().await?;
//! println!("{}: {}", info.name, info.description);
//! # Ok(())
//! # }
//! ```

pub mod client;
mod de;
pub mod error;
pub mod events;
pub mod parameters;
pub mod sse;
pub mod stream;
pub mod types;

pub use client::{build_http_client, DifyClient, EventByteStream, WorkflowApi};
pub use error::{ClientError, DecodeError, DemuxError, FormError, HandlerError};
pub use events::{
    ErrorEvent, EventBase, MessageEndEvent, NodeFinishedEvent, StreamEvent, TtsEvent,
    WorkflowFinishedEvent,
};
pub use parameters::{InputField, InputKind};
pub use sse::SseFrameDecoder;
pub use stream::{
    HandlerResult, StreamDemultiplexer, StreamError, StreamHandler, StreamOutcome, StreamStats,
};
pub use types::{
    AppInfo, AppParameters, FileAttachment, ResponseMode, WorkflowRunRequest, DEFAULT_USER,
};
