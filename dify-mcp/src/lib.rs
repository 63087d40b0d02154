//! # Dify MCP server
//!
//! Exposes Dify workflows as Model Context Protocol tools. Each configured
//! application credential becomes one tool; calling the tool runs the
//! workflow in streaming mode and returns the `end` node's output as text.
//!
//! The pieces, from the bottom up:
//!
//! - [`bridge`]: single-use handoff of the result from the stream task
//! - [`registry`]: tool name to application mapping, built at startup
//! - [`invocation`]: one workflow run with deadline and cancellation
//! - [`server`]: the rmcp `ServerHandler`
//! - [`serve`]: stdio and streamable HTTP transports
//! - [`config`]: layered configuration

pub mod bridge;
pub mod config;
pub mod error;
pub mod invocation;
pub mod registry;
pub mod serve;
pub mod server;

pub use bridge::{InvocationResult, InvocationStatus};
pub use config::{ConfigOverrides, ServerConfig, Transport};
pub use error::{BridgeError, ConfigError, InvocationError, RegistryError, ServeError};
pub use invocation::{invoke, invoke_request, InvocationOptions};
pub use registry::{
    Credential, DifyConnector, WorkflowConnector, WorkflowRegistration, WorkflowRegistry,
};
pub use serve::{serve_stdio, start_http, HttpServerHandle};
pub use server::DifyMcpServer;
