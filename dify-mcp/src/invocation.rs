//! Running one workflow invocation
//!
//! Each call spawns a producer task that opens the upstream event stream and
//! feeds it through a [`StreamDemultiplexer`]. The handler hands the terminal
//! payload across a [`bridge`](crate::bridge) to the caller, which waits with
//! a deadline. The producer is cancelled as soon as the caller stops waiting,
//! whatever the reason.

use crate::bridge::{self, render_payload, BridgeProducer, InvocationResult, InvocationStatus};
use crate::error::{BridgeError, InvocationError};
use dify_client::{
    HandlerResult, NodeFinishedEvent, StreamDemultiplexer, StreamError, StreamEvent,
    StreamHandler, WorkflowApi, WorkflowFinishedEvent, WorkflowRunRequest, DEFAULT_USER,
};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default deadline for a workflow to produce its result
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Bound on the best-effort upstream stop request
const STOP_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type Delivery = Result<InvocationResult, InvocationError>;

/// Settings shared by all invocations
#[derive(Debug, Clone)]
pub struct InvocationOptions {
    /// Upstream user identifier sent with every run
    pub user: String,
    /// How long to wait for the terminal event
    pub timeout: Duration,
}

impl Default for InvocationOptions {
    fn default() -> Self {
        Self {
            user: DEFAULT_USER.to_string(),
            timeout: DEFAULT_INVOCATION_TIMEOUT,
        }
    }
}

/// Run a workflow and wait for its aggregated text result
///
/// Cancelling `cancel` abandons the wait and stops the producer.
pub async fn invoke(
    api: Arc<dyn WorkflowApi>,
    workflow: &str,
    inputs: Map<String, Value>,
    options: &InvocationOptions,
    cancel: CancellationToken,
) -> Result<String, InvocationError> {
    let request = WorkflowRunRequest::streaming(inputs, options.user.clone());
    invoke_request(api, workflow, request, options, cancel).await
}

/// [`invoke`] with a prepared run request, e.g. one carrying attachments
pub async fn invoke_request(
    api: Arc<dyn WorkflowApi>,
    workflow: &str,
    request: WorkflowRunRequest,
    options: &InvocationOptions,
    cancel: CancellationToken,
) -> Result<String, InvocationError> {
    info!(
        "Invoking workflow '{}' ({} files)",
        workflow,
        request.files.len()
    );

    let (producer, consumer) = bridge::channel::<Delivery>();
    let task_id = Arc::new(OnceLock::new());
    let producer_token = cancel.child_token();
    // stops the producer on every exit path, including drop of this future
    let _producer_guard = producer_token.clone().drop_guard();

    tokio::spawn(produce(
        api.clone(),
        request,
        BridgeHandler::new(producer, task_id.clone()),
        producer_token,
    ));

    let waited = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Invocation of workflow '{}' cancelled by the caller", workflow);
            stop_upstream_task(api, &task_id, &options.user);
            return Err(InvocationError::Cancelled);
        }
        waited = consumer.wait(options.timeout) => waited,
    };

    let delivery = match waited {
        Ok(delivery) => delivery,
        Err(BridgeError::Timeout(deadline)) => {
            warn!(
                "Workflow '{}' produced no result within {:?}",
                workflow, deadline
            );
            stop_upstream_task(api, &task_id, &options.user);
            return Err(InvocationError::Timeout(deadline));
        }
        Err(BridgeError::Closed) => {
            return Err(InvocationError::Internal(
                "stream task exited without a result".to_string(),
            ))
        }
    };

    let result = delivery?;
    match result.status {
        InvocationStatus::Succeeded => {
            info!(
                "Workflow '{}' finished ({} bytes of output)",
                workflow,
                result.text.len()
            );
            Ok(result.text)
        }
        InvocationStatus::Failed => {
            warn!("Workflow '{}' failed: {}", workflow, result.text);
            Err(InvocationError::WorkflowFailed(result.text))
        }
        InvocationStatus::IncompleteStream => {
            warn!(
                "Workflow '{}' stream ended without a result ({} bytes of partial text)",
                workflow,
                result.text.len()
            );
            Err(InvocationError::IncompleteStream)
        }
    }
}

async fn produce(
    api: Arc<dyn WorkflowApi>,
    request: WorkflowRunRequest,
    handler: BridgeHandler,
    token: CancellationToken,
) {
    let mut demux = StreamDemultiplexer::new(handler);
    let outcome = tokio::select! {
        _ = token.cancelled() => {
            debug!("Workflow stream task cancelled");
            return;
        }
        outcome = async {
            let stream = api.run_workflow_streaming(&request).await?;
            let outcome = demux.run(stream).await?;
            Ok::<_, InvocationError>(outcome)
        } => outcome,
    };

    let mut handler = demux.into_handler();
    match outcome {
        Ok(outcome) => {
            let stats = outcome.stats();
            debug!(
                "Workflow stream closed after {} frames ({} undecodable)",
                stats.frames, stats.decode_failures
            );
            if !outcome.is_terminated() {
                let partial = std::mem::take(&mut handler.message);
                handler.producer.deliver(Ok(InvocationResult::incomplete(partial)));
            }
        }
        Err(e) => {
            debug!("Workflow stream failed: {}", e);
            handler.producer.deliver(Err(e));
        }
    }
}

fn stop_upstream_task(api: Arc<dyn WorkflowApi>, task_id: &OnceLock<String>, user: &str) {
    let Some(task_id) = task_id.get().cloned() else {
        return;
    };
    let user = user.to_string();
    tokio::spawn(async move {
        match tokio::time::timeout(STOP_REQUEST_TIMEOUT, api.stop_workflow_task(&task_id, &user))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to stop workflow task {}: {}", task_id, e),
            Err(_) => warn!("Stopping workflow task {} timed out", task_id),
        }
    });
}

/// Stream handler that resolves the bridge
struct BridgeHandler {
    producer: BridgeProducer<Delivery>,
    task_id: Arc<OnceLock<String>>,
    message: String,
}

impl BridgeHandler {
    fn new(producer: BridgeProducer<Delivery>, task_id: Arc<OnceLock<String>>) -> Self {
        Self {
            producer,
            task_id,
            message: String::new(),
        }
    }

    fn resolve(&mut self, result: InvocationResult) {
        if !self.producer.deliver(Ok(result)) {
            debug!("Ignoring result after the invocation was already resolved");
        }
    }
}

impl StreamHandler for BridgeHandler {
    fn on_event(&mut self, event: &StreamEvent) -> HandlerResult {
        if let Some(task_id) = event.task_id() {
            if self.task_id.get().is_none() {
                debug!("Workflow task id is {}", task_id);
                let _ = self.task_id.set(task_id.to_string());
            }
        }
        Ok(())
    }

    fn on_terminal(&mut self, event: &NodeFinishedEvent) -> HandlerResult {
        self.resolve(InvocationResult::succeeded(render_payload(event.inputs())));
        Ok(())
    }

    fn on_message(&mut self, text: &str) -> HandlerResult {
        self.message.push_str(text);
        Ok(())
    }

    fn on_workflow_finished(&mut self, event: &WorkflowFinishedEvent) -> HandlerResult {
        if !event.succeeded() {
            let reason = match &event.data.error {
                Some(error) => error.clone(),
                None => format!("workflow finished with status '{}'", event.data.status),
            };
            self.resolve(InvocationResult::failed(reason));
        }
        Ok(())
    }

    fn on_error(&mut self, error: StreamError<'_>) -> HandlerResult {
        if let StreamError::Upstream(event) = error {
            self.resolve(InvocationResult::failed(event.message.clone()));
        }
        Ok(())
    }
}
