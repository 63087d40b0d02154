//! Scripted upstream used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use dify_client::{
    AppInfo, AppParameters, ClientError, EventByteStream, WorkflowApi, WorkflowRunRequest,
};
use dify_mcp::{Credential, WorkflowRegistration, WorkflowRegistry};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// One step of a scripted event stream
#[derive(Debug, Clone)]
pub enum Step {
    /// Send an event record as one SSE frame
    Event(Value),
    /// Send raw bytes
    Raw(&'static str),
    /// Pause before the next step
    Sleep(Duration),
}

pub fn event(record: Value) -> Step {
    Step::Event(record)
}

pub fn ping() -> Step {
    Step::Event(json!({"event": "ping"}))
}

pub fn end_node(task_id: &str, inputs: Value) -> Step {
    Step::Event(json!({
        "event": "node_finished",
        "task_id": task_id,
        "data": {"node_type": "end", "status": "succeeded", "inputs": inputs}
    }))
}

pub fn workflow_finished(task_id: &str, status: &str, error: Option<&str>) -> Step {
    Step::Event(json!({
        "event": "workflow_finished",
        "task_id": task_id,
        "data": {"status": status, "error": error}
    }))
}

/// A fake application whose workflow run replays a script
pub struct ScriptedApp {
    script: Vec<Step>,
    fail_run: Option<(u16, String)>,
    /// Tail of the stream after the script: stay open forever or close
    hang_after_script: bool,
    pub runs: Mutex<Vec<WorkflowRunRequest>>,
    pub stopped: Mutex<Vec<String>>,
    /// Number of event streams the caller has dropped
    released: Arc<AtomicUsize>,
}

/// Event stream that counts itself as released when dropped
struct TrackedStream {
    inner: EventByteStream,
    released: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = Result<Bytes, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptedApp {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            fail_run: None,
            hang_after_script: false,
            runs: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Keep the stream open once the script is exhausted
    pub fn hanging(mut self) -> Self {
        self.hang_after_script = true;
        self
    }

    /// Reject the run with an HTTP error before any stream is opened
    pub fn failing(mut self, status: u16, message: &str) -> Self {
        self.fail_run = Some((status, message.to_string()));
        self
    }

    pub fn released_streams(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Wait until `count` streams were dropped by the reader
    pub async fn streams_released(&self, count: usize, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.released_streams() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.released_streams() >= count
    }

    pub fn last_inputs(&self) -> Option<Value> {
        self.runs
            .lock()
            .unwrap()
            .last()
            .map(|r| Value::Object(r.inputs.clone()))
    }
}

#[async_trait]
impl WorkflowApi for ScriptedApp {
    async fn app_info(&self) -> Result<AppInfo, ClientError> {
        Ok(AppInfo::default())
    }

    async fn app_parameters(&self) -> Result<AppParameters, ClientError> {
        Ok(AppParameters::default())
    }

    async fn run_workflow_streaming(
        &self,
        request: &WorkflowRunRequest,
    ) -> Result<EventByteStream, ClientError> {
        self.runs.lock().unwrap().push(request.clone());
        if let Some((status, message)) = &self.fail_run {
            return Err(ClientError::Status {
                status: *status,
                code: None,
                message: message.clone(),
            });
        }

        let steps = stream::iter(self.script.clone()).then(|step| async move {
            match step {
                Step::Event(record) => Some(Bytes::from(format!("data: {}\n\n", record))),
                Step::Raw(raw) => Some(Bytes::from_static(raw.as_bytes())),
                Step::Sleep(duration) => {
                    tokio::time::sleep(duration).await;
                    None
                }
            }
        });
        let body = steps.filter_map(|chunk| async move { chunk.map(Ok::<Bytes, ClientError>) });

        let inner = if self.hang_after_script {
            body.chain(stream::pending()).boxed()
        } else {
            body.boxed()
        };
        Ok(TrackedStream {
            inner,
            released: self.released.clone(),
        }
        .boxed())
    }

    async fn stop_workflow_task(&self, task_id: &str, _user: &str) -> Result<(), ClientError> {
        self.stopped.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

/// A required string field named `document`
pub fn document_field() -> dify_client::InputField {
    dify_client::InputField {
        name: "document".to_string(),
        label: "Document".to_string(),
        kind: dify_client::InputKind::String,
        required: true,
        options: Vec::new(),
        max_length: None,
    }
}

/// Registry with one scripted workflow per `(name, app)` pair
pub fn registry_of(apps: Vec<(&str, Arc<ScriptedApp>)>) -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    for (name, app) in apps {
        registry.register(WorkflowRegistration::new(
            name,
            format!("{} workflow", name),
            vec![document_field()],
            Credential::new(format!("app-{}", name)),
            app,
        ));
    }
    registry
}

/// Registry with one scripted workflow whose app takes file uploads
pub fn registry_with_files(name: &str, app: Arc<ScriptedApp>) -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    registry.register(
        WorkflowRegistration::new(
            name,
            format!("{} workflow", name),
            vec![document_field()],
            Credential::new(format!("app-{}", name)),
            app,
        )
        .with_file_upload(true),
    );
    registry
}

/// Text and error flag of a tool result
pub fn result_text(result: &rmcp::model::CallToolResult) -> (String, bool) {
    let value = serde_json::to_value(result).unwrap();
    let text = value["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let is_error = value["isError"].as_bool().unwrap_or(false);
    (text, is_error)
}
