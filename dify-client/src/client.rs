//! HTTP client for the Dify service API
//!
//! [`DifyClient`] speaks to one Dify application identified by its API key.
//! All requests share the caller's [`reqwest::Client`] so many applications
//! can be served from a single connection pool.

use crate::error::ClientError;
use crate::types::{AppInfo, AppParameters, WorkflowRunRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Raw body of a streaming workflow run
pub type EventByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Operations the MCP layer needs from an upstream application
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    /// `GET /info`
    async fn app_info(&self) -> Result<AppInfo, ClientError>;

    /// `GET /parameters`
    async fn app_parameters(&self) -> Result<AppParameters, ClientError>;

    /// `POST /workflows/run` in streaming mode, returning the raw SSE body
    async fn run_workflow_streaming(
        &self,
        request: &WorkflowRunRequest,
    ) -> Result<EventByteStream, ClientError>;

    /// `POST /workflows/tasks/{task_id}/stop`
    async fn stop_workflow_task(&self, task_id: &str, user: &str) -> Result<(), ClientError>;
}

/// Build the shared HTTP client used for all upstream applications
///
/// Only the connect phase is bounded; workflow streams may legitimately stay
/// open for minutes.
pub fn build_http_client(connect_timeout: Duration) -> Result<Client, ClientError> {
    Ok(Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Client for one Dify application
#[derive(Clone)]
pub struct DifyClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for DifyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DifyClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl DifyClient {
    /// Create a client for the application behind `api_key`
    ///
    /// # Errors
    ///
    /// * `ClientError::InvalidUrl` - if `base_url` is not an absolute
    ///   hierarchical URL such as `http://localhost/v1`
    pub fn new(
        http: Client,
        base_url: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let invalid = |source| ClientError::InvalidUrl {
            url: base_url.to_string(),
            source,
        };
        let base_url = Url::parse(base_url).map_err(invalid)?;
        if base_url.cannot_be_a_base() {
            return Err(invalid(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }

        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// The service API base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request.bearer_auth(&self.api_key).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = match body.message {
            Some(message) if !message.is_empty() => message,
            _ if !text.trim().is_empty() => text.trim().to_string(),
            _ => status.canonical_reason().unwrap_or("request failed").to_string(),
        };
        debug!("Dify API answered {}: {}", status, message);
        Err(ClientError::Status {
            status: status.as_u16(),
            code: body.code,
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, segment: &str) -> Result<T, ClientError> {
        let url = self.endpoint(&[segment]);
        debug!("GET {}", url);
        let response = self.send(self.http.get(url)).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl WorkflowApi for DifyClient {
    async fn app_info(&self) -> Result<AppInfo, ClientError> {
        self.get_json("info").await
    }

    async fn app_parameters(&self) -> Result<AppParameters, ClientError> {
        self.get_json("parameters").await
    }

    async fn run_workflow_streaming(
        &self,
        request: &WorkflowRunRequest,
    ) -> Result<EventByteStream, ClientError> {
        let url = self.endpoint(&["workflows", "run"]);
        debug!("POST {} ({} inputs)", url, request.inputs.len());
        let response = self
            .send(
                self.http
                    .post(url)
                    .header(ACCEPT, "text/event-stream")
                    .json(request),
            )
            .await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed())
    }

    async fn stop_workflow_task(&self, task_id: &str, user: &str) -> Result<(), ClientError> {
        let url = self.endpoint(&["workflows", "tasks", task_id, "stop"]);
        self.send(
            self.http
                .post(url)
                .json(&serde_json::json!({ "user": user })),
        )
        .await?;
        info!("Stopped workflow task {}", task_id);
        Ok(())
    }
}
