//! Typed events of the Dify workflow stream
//!
//! Each SSE frame from `POST /workflows/run` carries one JSON record tagged by
//! its `event` field. [`StreamEvent::decode`] turns a frame into exactly one
//! variant. Unknown tags are kept as [`StreamEvent::Other`] with the record
//! preserved, so a newer upstream never breaks an older reader.

use crate::de::{
    lenient_number, lenient_object, lenient_string, mapping_sequence, null_as_default,
    optional_text,
};
use crate::error::DecodeError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node type of the graph node that collects a workflow's output
pub const END_NODE_TYPE: &str = "end";

/// Fields shared by every stream event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBase {
    /// Upstream task id, used to stop a running workflow
    #[serde(deserialize_with = "lenient_string")]
    pub task_id: String,
    /// Run id shared by all events of one workflow run
    #[serde(deserialize_with = "optional_text")]
    pub workflow_run_id: Option<String>,
    /// Message id, set on chat-style events
    #[serde(deserialize_with = "optional_text")]
    pub message_id: Option<String>,
    /// Event discriminator
    #[serde(deserialize_with = "lenient_string")]
    pub event: String,
    /// Unix timestamp of creation
    #[serde(deserialize_with = "lenient_number")]
    pub created_at: i64,
    /// Base64 audio payload of TTS events
    #[serde(deserialize_with = "optional_text")]
    pub audio: Option<String>,
}

/// `workflow_started` payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkflowStartedData {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub workflow_id: String,
    #[serde(deserialize_with = "lenient_number")]
    pub sequence_number: i64,
    #[serde(deserialize_with = "lenient_number")]
    pub created_at: i64,
}

/// `node_started` payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeStartedData {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub node_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub node_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_number")]
    pub index: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub predecessor_node_id: String,
    /// Ordered input mappings of the node
    #[serde(deserialize_with = "mapping_sequence")]
    pub inputs: Vec<Map<String, Value>>,
    #[serde(deserialize_with = "lenient_number")]
    pub created_at: i64,
}

/// Text and usage produced by a node or a whole run
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Outputs {
    #[serde(deserialize_with = "lenient_string")]
    pub text: String,
    pub usage: Value,
}

/// Token and cost accounting of a finished node
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutionMetadata {
    #[serde(deserialize_with = "lenient_number")]
    pub total_tokens: u64,
    #[serde(deserialize_with = "lenient_string")]
    pub total_price: String,
    #[serde(deserialize_with = "lenient_string")]
    pub currency: String,
}

/// `node_finished` payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeFinishedData {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub node_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub node_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_number")]
    pub index: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub predecessor_node_id: String,
    /// Untyped inputs; for the end node this is the workflow's output
    pub inputs: Value,
    pub process_data: Value,
    #[serde(deserialize_with = "lenient_object")]
    pub outputs: Outputs,
    #[serde(deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(deserialize_with = "optional_text")]
    pub error: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub elapsed_time: f64,
    #[serde(deserialize_with = "lenient_object")]
    pub execution_metadata: ExecutionMetadata,
    #[serde(deserialize_with = "lenient_number")]
    pub created_at: i64,
    /// Set when the node ran inside an iteration
    #[serde(deserialize_with = "optional_text")]
    pub iteration_id: Option<String>,
    /// Set when the node ran inside a loop
    #[serde(deserialize_with = "optional_text")]
    pub loop_id: Option<String>,
}

/// `workflow_finished` payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkflowFinishedData {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub workflow_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(deserialize_with = "lenient_object")]
    pub outputs: Outputs,
    #[serde(deserialize_with = "optional_text")]
    pub error: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub elapsed_time: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub total_tokens: u64,
    #[serde(deserialize_with = "lenient_number")]
    pub total_steps: u64,
    #[serde(deserialize_with = "lenient_number")]
    pub created_at: i64,
    #[serde(deserialize_with = "lenient_number")]
    pub finished_at: i64,
}

/// `text_chunk` payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TextChunkData {
    #[serde(deserialize_with = "lenient_string")]
    pub text: String,
    /// Variable path the text was produced from
    #[serde(deserialize_with = "null_as_default")]
    pub from_variable_selector: Vec<String>,
}

/// A `workflow_started` event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkflowStartedEvent {
    #[serde(skip)]
    pub base: EventBase,
    #[serde(deserialize_with = "null_as_default")]
    pub data: WorkflowStartedData,
}

/// A `node_started` event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeStartedEvent {
    #[serde(skip)]
    pub base: EventBase,
    #[serde(deserialize_with = "null_as_default")]
    pub data: NodeStartedData,
}

/// A `node_finished` event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeFinishedEvent {
    #[serde(skip)]
    pub base: EventBase,
    #[serde(deserialize_with = "null_as_default")]
    pub data: NodeFinishedData,
}

impl NodeFinishedEvent {
    /// Whether the node is a graph `end` node
    pub fn is_end_node(&self) -> bool {
        self.data.node_type == END_NODE_TYPE
    }

    /// Whether the node ran on the workflow's own channel rather than inside
    /// an iteration or loop
    pub fn is_top_level(&self) -> bool {
        self.data.iteration_id.is_none() && self.data.loop_id.is_none()
    }

    /// The event that completes a workflow run
    pub fn is_terminal(&self) -> bool {
        self.is_end_node() && self.is_top_level()
    }

    /// The node's raw inputs
    pub fn inputs(&self) -> &Value {
        &self.data.inputs
    }
}

/// A `workflow_finished` event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkflowFinishedEvent {
    #[serde(skip)]
    pub base: EventBase,
    #[serde(deserialize_with = "null_as_default")]
    pub data: WorkflowFinishedData,
}

impl WorkflowFinishedEvent {
    /// Whether the run ended in a success state
    pub fn succeeded(&self) -> bool {
        matches!(self.data.status.as_str(), "succeeded" | "partial-succeeded")
    }
}

/// A `text_chunk` event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TextChunkEvent {
    #[serde(skip)]
    pub base: EventBase,
    #[serde(deserialize_with = "null_as_default")]
    pub data: TextChunkData,
}

/// A `message` or `agent_message` event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MessageEvent {
    #[serde(skip)]
    pub base: EventBase,
    #[serde(deserialize_with = "lenient_string")]
    pub conversation_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub answer: String,
}

/// A `message_end` event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MessageEndEvent {
    #[serde(skip)]
    pub base: EventBase,
    #[serde(deserialize_with = "lenient_string")]
    pub conversation_id: String,
    pub metadata: Value,
}

/// A `tts_message` or `tts_message_end` event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TtsEvent {
    #[serde(skip)]
    pub base: EventBase,
    #[serde(deserialize_with = "lenient_string")]
    pub conversation_id: String,
}

/// An `error` event reported by the upstream mid-stream
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ErrorEvent {
    #[serde(skip)]
    pub base: EventBase,
    #[serde(deserialize_with = "lenient_number")]
    pub status: u16,
    #[serde(deserialize_with = "lenient_string")]
    pub code: String,
    #[serde(deserialize_with = "lenient_string")]
    pub message: String,
}

/// An event with a discriminator this crate does not model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OtherEvent {
    pub base: EventBase,
    /// The complete record as received
    pub record: Map<String, Value>,
}

/// One decoded record of the workflow stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    WorkflowStarted(WorkflowStartedEvent),
    NodeStarted(NodeStartedEvent),
    NodeFinished(NodeFinishedEvent),
    WorkflowFinished(WorkflowFinishedEvent),
    TextChunk(TextChunkEvent),
    Message(MessageEvent),
    MessageEnd(MessageEndEvent),
    TtsMessage(TtsEvent),
    TtsMessageEnd(TtsEvent),
    Error(ErrorEvent),
    Ping(EventBase),
    Other(OtherEvent),
}

impl StreamEvent {
    /// Decode one frame payload
    ///
    /// Missing fields take their zero value. Only a missing discriminator,
    /// non-JSON input, or a field of an unusable type is an error.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(frame).map_err(DecodeError::InvalidJson)?;
        Self::from_value(value)
    }

    /// Decode an already-parsed record
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(record) = value else {
            return Err(DecodeError::NotAnObject);
        };
        let kind = match record.get("event") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(DecodeError::MissingDiscriminator),
        };
        let value = Value::Object(record);
        let base: EventBase = parse(&value, &kind)?;

        let event = match kind.as_str() {
            "workflow_started" => {
                let mut event: WorkflowStartedEvent = parse(&value, &kind)?;
                event.base = base;
                Self::WorkflowStarted(event)
            }
            "node_started" => {
                let mut event: NodeStartedEvent = parse(&value, &kind)?;
                event.base = base;
                Self::NodeStarted(event)
            }
            "node_finished" => {
                let mut event: NodeFinishedEvent = parse(&value, &kind)?;
                event.base = base;
                Self::NodeFinished(event)
            }
            "workflow_finished" => {
                let mut event: WorkflowFinishedEvent = parse(&value, &kind)?;
                event.base = base;
                Self::WorkflowFinished(event)
            }
            "text_chunk" => {
                let mut event: TextChunkEvent = parse(&value, &kind)?;
                event.base = base;
                Self::TextChunk(event)
            }
            "message" | "agent_message" => {
                let mut event: MessageEvent = parse(&value, &kind)?;
                event.base = base;
                Self::Message(event)
            }
            "message_end" => {
                let mut event: MessageEndEvent = parse(&value, &kind)?;
                event.base = base;
                Self::MessageEnd(event)
            }
            "tts_message" | "tts_message_end" => {
                let mut event: TtsEvent = parse(&value, &kind)?;
                event.base = base;
                if kind == "tts_message" {
                    Self::TtsMessage(event)
                } else {
                    Self::TtsMessageEnd(event)
                }
            }
            "error" => {
                let mut event: ErrorEvent = parse(&value, &kind)?;
                event.base = base;
                Self::Error(event)
            }
            "ping" => Self::Ping(base),
            _ => {
                let Value::Object(record) = value else {
                    return Err(DecodeError::NotAnObject);
                };
                Self::Other(OtherEvent { base, record })
            }
        };
        Ok(event)
    }

    /// The base fields of any variant
    pub fn base(&self) -> &EventBase {
        match self {
            Self::WorkflowStarted(e) => &e.base,
            Self::NodeStarted(e) => &e.base,
            Self::NodeFinished(e) => &e.base,
            Self::WorkflowFinished(e) => &e.base,
            Self::TextChunk(e) => &e.base,
            Self::Message(e) => &e.base,
            Self::MessageEnd(e) => &e.base,
            Self::TtsMessage(e) | Self::TtsMessageEnd(e) => &e.base,
            Self::Error(e) => &e.base,
            Self::Ping(base) => base,
            Self::Other(e) => &e.base,
        }
    }

    /// The event discriminator
    pub fn kind(&self) -> &str {
        &self.base().event
    }

    /// Upstream task id, if the event carried one
    pub fn task_id(&self) -> Option<&str> {
        let task_id = self.base().task_id.as_str();
        (!task_id.is_empty()).then_some(task_id)
    }
}

fn parse<T: DeserializeOwned>(value: &Value, kind: &str) -> Result<T, DecodeError> {
    T::deserialize(value).map_err(|source| DecodeError::Malformed {
        kind: kind.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> StreamEvent {
        StreamEvent::decode(&value.to_string()).unwrap()
    }

    #[test]
    fn test_decode_workflow_started() {
        let event = decode(json!({
            "event": "workflow_started",
            "task_id": "t-1",
            "workflow_run_id": "run-1",
            "data": {"id": "run-1", "workflow_id": "wf-9", "sequence_number": 4, "created_at": 1700000000}
        }));
        let StreamEvent::WorkflowStarted(started) = event else {
            panic!("expected workflow_started");
        };
        assert_eq!(started.base.task_id, "t-1");
        assert_eq!(started.base.workflow_run_id.as_deref(), Some("run-1"));
        assert_eq!(started.data.workflow_id, "wf-9");
        assert_eq!(started.data.sequence_number, 4);
    }

    #[test]
    fn test_decode_node_started_with_object_inputs() {
        let event = decode(json!({
            "event": "node_started",
            "task_id": "t-1",
            "data": {"node_id": "llm", "node_type": "llm", "title": "LLM", "index": 2,
                     "predecessor_node_id": "start", "inputs": {"query": "hi"}}
        }));
        let StreamEvent::NodeStarted(started) = event else {
            panic!("expected node_started");
        };
        assert_eq!(started.data.title, "LLM");
        assert_eq!(started.data.inputs.len(), 1);
        assert_eq!(started.data.inputs[0]["query"], "hi");
    }

    #[test]
    fn test_decode_node_finished_with_nulls_and_numeric_price() {
        let event = decode(json!({
            "event": "node_finished",
            "task_id": "t-1",
            "workflow_run_id": "run-1",
            "data": {
                "node_id": "end",
                "node_type": "end",
                "index": 3,
                "predecessor_node_id": null,
                "inputs": {"text": "HELLO"},
                "process_data": null,
                "outputs": null,
                "status": "succeeded",
                "error": null,
                "elapsed_time": 0.25,
                "execution_metadata": {"total_tokens": 12, "total_price": 0.001, "currency": "USD"}
            }
        }));
        let StreamEvent::NodeFinished(finished) = event else {
            panic!("expected node_finished");
        };
        assert!(finished.is_terminal());
        assert_eq!(finished.inputs(), &json!({"text": "HELLO"}));
        assert_eq!(finished.data.predecessor_node_id, "");
        assert_eq!(finished.data.outputs, Outputs::default());
        assert_eq!(finished.data.error, None);
        assert_eq!(finished.data.execution_metadata.total_tokens, 12);
        assert_eq!(finished.data.execution_metadata.total_price, "0.001");
    }

    #[test]
    fn test_mistyped_telemetry_keeps_terminal_payload() {
        let event = decode(json!({
            "event": "node_finished",
            "task_id": "t-1",
            "created_at": "soon",
            "data": {
                "node_type": "end",
                "index": "3",
                "inputs": {"text": "HELLO"},
                "outputs": "n/a",
                "elapsed_time": "0.25",
                "created_at": null,
                "execution_metadata": {"total_tokens": "12", "total_price": "0.001"}
            }
        }));
        let StreamEvent::NodeFinished(finished) = event else {
            panic!("expected node_finished");
        };
        assert!(finished.is_terminal());
        assert_eq!(finished.inputs(), &json!({"text": "HELLO"}));
        assert_eq!(finished.data.index, 3);
        assert_eq!(finished.data.elapsed_time, 0.25);
        assert_eq!(finished.data.outputs, Outputs::default());
        assert_eq!(finished.data.execution_metadata.total_tokens, 12);
        assert_eq!(finished.base.created_at, 0);
    }

    #[test]
    fn test_end_node_inside_iteration_is_not_terminal() {
        let event = decode(json!({
            "event": "node_finished",
            "data": {"node_type": "end", "iteration_id": "iter-1", "inputs": {}}
        }));
        let StreamEvent::NodeFinished(finished) = event else {
            panic!("expected node_finished");
        };
        assert!(finished.is_end_node());
        assert!(!finished.is_top_level());
        assert!(!finished.is_terminal());
    }

    #[test]
    fn test_non_end_node_is_not_terminal() {
        let event = decode(json!({"event": "node_finished", "data": {"node_type": "llm"}}));
        let StreamEvent::NodeFinished(finished) = event else {
            panic!("expected node_finished");
        };
        assert!(!finished.is_terminal());
    }

    #[test]
    fn test_decode_workflow_finished() {
        let event = decode(json!({
            "event": "workflow_finished",
            "data": {"status": "failed", "error": "boom", "outputs": {"text": "partial"},
                     "total_tokens": 40, "total_steps": 5, "finished_at": 1700000100}
        }));
        let StreamEvent::WorkflowFinished(finished) = event else {
            panic!("expected workflow_finished");
        };
        assert!(!finished.succeeded());
        assert_eq!(finished.data.error.as_deref(), Some("boom"));
        assert_eq!(finished.data.outputs.text, "partial");
        assert_eq!(finished.data.total_steps, 5);
    }

    #[test]
    fn test_decode_text_chunk_and_messages() {
        let chunk = decode(json!({
            "event": "text_chunk",
            "data": {"text": "Hel", "from_variable_selector": ["llm", "text"]}
        }));
        let StreamEvent::TextChunk(chunk) = chunk else {
            panic!("expected text_chunk");
        };
        assert_eq!(chunk.data.text, "Hel");
        assert_eq!(chunk.data.from_variable_selector, vec!["llm", "text"]);

        let message = decode(json!({"event": "agent_message", "answer": "lo", "conversation_id": "c"}));
        assert!(matches!(message, StreamEvent::Message(ref m) if m.answer == "lo"));
        assert_eq!(message.kind(), "agent_message");
    }

    #[test]
    fn test_decode_audio_events() {
        let tts = decode(json!({"event": "tts_message", "conversation_id": "c", "audio": "AAA"}));
        assert!(matches!(tts, StreamEvent::TtsMessage(ref e) if e.conversation_id == "c"));
        assert_eq!(tts.base().audio.as_deref(), Some("AAA"));

        let end = decode(json!({"event": "tts_message_end", "conversation_id": "c"}));
        assert!(matches!(end, StreamEvent::TtsMessageEnd(_)));
    }

    #[test]
    fn test_decode_ping_and_error() {
        assert!(matches!(decode(json!({"event": "ping"})), StreamEvent::Ping(_)));

        let error = decode(json!({"event": "error", "status": 400, "code": "invalid_param", "message": "bad"}));
        let StreamEvent::Error(error) = error else {
            panic!("expected error");
        };
        assert_eq!(error.status, 400);
        assert_eq!(error.message, "bad");
    }

    #[test]
    fn test_unknown_event_is_preserved() {
        let event = decode(json!({"event": "iteration_next", "task_id": "t", "data": {"index": 1}}));
        let StreamEvent::Other(other) = event else {
            panic!("expected other");
        };
        assert_eq!(other.base.event, "iteration_next");
        assert_eq!(other.record["data"]["index"], 1);
    }

    #[test]
    fn test_missing_discriminator_is_an_error() {
        let err = StreamEvent::decode(r#"{"task_id": "t"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingDiscriminator));

        let err = StreamEvent::decode(r#"{"event": 7}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingDiscriminator));
    }

    #[test]
    fn test_invalid_frames_are_errors() {
        assert!(matches!(
            StreamEvent::decode("not json").unwrap_err(),
            DecodeError::InvalidJson(_)
        ));
        assert!(matches!(
            StreamEvent::decode("[1, 2]").unwrap_err(),
            DecodeError::NotAnObject
        ));
        assert!(matches!(
            StreamEvent::decode(r#"{"event": "node_finished", "data": "first"}"#)
                .unwrap_err(),
            DecodeError::Malformed { ref kind, .. } if kind == "node_finished"
        ));
    }

    #[test]
    fn test_empty_task_id_is_none() {
        let event = decode(json!({"event": "ping"}));
        assert_eq!(event.task_id(), None);
        let event = decode(json!({"event": "ping", "task_id": "t-2"}));
        assert_eq!(event.task_id(), Some("t-2"));
    }
}
