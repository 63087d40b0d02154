//! MCP server exposing registered workflows as tools
//!
//! Every failure while running a workflow is reported as a tool result with
//! the error flag set, never as a protocol error.

use crate::error::InvocationError;
use crate::invocation::{self, InvocationOptions};
use crate::registry::{WorkflowRegistration, WorkflowRegistry};
use dify_client::{FileAttachment, InputField, InputKind, WorkflowRunRequest};
use rmcp::model::*;
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Server name reported during initialization
pub const SERVER_NAME: &str = "dify-workflow-server";

/// Tool argument carrying file attachments for apps with file upload enabled
pub const FILES_ARGUMENT: &str = "files";

const SERVER_INSTRUCTIONS: &str = "Each tool runs one Dify workflow with the given inputs and \
returns the workflow's final output as text.";

/// MCP handler backed by a workflow registry
#[derive(Debug, Clone)]
pub struct DifyMcpServer {
    registry: Arc<WorkflowRegistry>,
    options: Arc<InvocationOptions>,
}

impl DifyMcpServer {
    pub fn new(registry: WorkflowRegistry, options: InvocationOptions) -> Self {
        Self {
            registry: Arc::new(registry),
            options: Arc::new(options),
        }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Tool descriptors for all registered workflows, in name order
    pub fn tools(&self) -> Vec<Tool> {
        self.registry.iter().map(tool_descriptor).collect()
    }

    /// Run the workflow named `name` with the caller's arguments
    ///
    /// Always yields a tool result; failures carry the error flag.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        cancel: CancellationToken,
    ) -> CallToolResult {
        let Some(registration) = self.registry.lookup(name) else {
            tracing::warn!("Unknown workflow requested: {}", name);
            return CallToolResult::error(vec![Content::text(format!(
                "Workflow {} not found",
                name
            ))]);
        };

        let mut arguments = arguments.unwrap_or_default();
        let files = match take_files(registration, &mut arguments) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Rejected call to workflow '{}': {}", name, e);
                return CallToolResult::error(vec![Content::text(format!(
                    "Failed to execute workflow: {}",
                    e
                ))]);
            }
        };
        let inputs = collect_inputs(registration.fields(), arguments);
        let request =
            WorkflowRunRequest::streaming(inputs, self.options.user.clone()).with_files(files);

        match invocation::invoke_request(
            registration.api().clone(),
            registration.name(),
            request,
            &self.options,
            cancel,
        )
        .await
        {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => CallToolResult::error(vec![Content::text(format!(
                "Failed to execute workflow: {}",
                e
            ))]),
        }
    }
}

/// Build the tool descriptor for a workflow
pub fn tool_descriptor(registration: &WorkflowRegistration) -> Tool {
    let description = if registration.description().trim().is_empty() {
        format!("Run the Dify workflow '{}'", registration.name())
    } else {
        registration.description().to_string()
    };
    let mut schema = input_schema(registration.fields());
    if takes_files_argument(registration) {
        if let Some(Value::Object(properties)) = schema.get_mut("properties") {
            properties.insert(
                FILES_ARGUMENT.into(),
                json!({
                    "type": "array",
                    "description": "Files handed to the workflow",
                    "items": {"type": "object", "properties": file_properties()}
                }),
            );
        }
    }
    Tool::new(
        registration.name().to_string(),
        description,
        Arc::new(schema),
    )
}

/// A declared input of the same name takes precedence over attachments
fn takes_files_argument(registration: &WorkflowRegistration) -> bool {
    registration.accepts_files()
        && !registration
            .fields()
            .iter()
            .any(|field| field.name == FILES_ARGUMENT)
}

/// Remove and parse the attachments argument
///
/// Apps without file upload never consume it, so it falls through to
/// [`collect_inputs`] like any other argument.
fn take_files(
    registration: &WorkflowRegistration,
    arguments: &mut JsonObject,
) -> Result<Vec<FileAttachment>, InvocationError> {
    if !takes_files_argument(registration) {
        return Ok(Vec::new());
    }
    match arguments.remove(FILES_ARGUMENT) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(files) => serde_json::from_value(files).map_err(InvocationError::InvalidFiles),
    }
}

/// JSON schema describing a workflow's declared inputs
pub fn input_schema(fields: &[InputField]) -> JsonObject {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in fields {
        let mut property = Map::new();
        property.insert("type".into(), json!(field.kind.json_type()));
        property.insert("description".into(), json!(field.label));
        match field.kind {
            InputKind::String => {
                if !field.options.is_empty() {
                    property.insert("enum".into(), json!(field.options));
                }
                if let Some(max_length) = field.max_length.filter(|n| *n > 0) {
                    property.insert("maxLength".into(), json!(max_length));
                }
            }
            InputKind::File => {
                property.insert("properties".into(), file_properties());
            }
            InputKind::FileList => {
                property.insert(
                    "items".into(),
                    json!({"type": "object", "properties": file_properties()}),
                );
            }
            InputKind::Number | InputKind::Boolean => {}
        }
        if field.required {
            required.push(Value::String(field.name.clone()));
        }
        properties.insert(field.name.clone(), Value::Object(property));
    }

    let mut schema = Map::new();
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    schema
}

fn file_properties() -> Value {
    json!({
        "type": {"type": "string", "description": "File kind, e.g. document or image"},
        "transfer_method": {"type": "string", "enum": ["remote_url", "local_file"]},
        "url": {"type": "string"},
        "upload_file_id": {"type": "string"}
    })
}

/// Pick the declared inputs out of the caller's arguments
///
/// Undeclared arguments are dropped; missing ones are sent as empty values.
pub fn collect_inputs(fields: &[InputField], mut arguments: JsonObject) -> Map<String, Value> {
    fields
        .iter()
        .map(|field| {
            let value = arguments.remove(&field.name).unwrap_or_else(|| {
                if field.required {
                    tracing::debug!("Required input '{}' not supplied", field.name);
                }
                field.kind.empty_value()
            });
            (field.name.clone(), value)
        })
        .collect()
}

impl ServerHandler for DifyMcpServer {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        tracing::debug!("call_tool '{}'", request.name);
        Ok(self
            .execute(&request.name, request.arguments, context.ct.clone())
            .await)
    }

    fn get_info(&self) -> ServerInfo {
        let mut capabilities = ServerCapabilities::default();
        capabilities.tools = Some(ToolsCapability {
            list_changed: Some(false),
        });
        let server_info = Implementation::new(SERVER_NAME, env!("CARGO_PKG_VERSION"))
            .with_title("Dify Workflow Server");
        ServerInfo::new(capabilities)
            .with_protocol_version(ProtocolVersion::default())
            .with_server_info(server_info)
            .with_instructions(SERVER_INSTRUCTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, kind: InputKind, required: bool) -> InputField {
        InputField {
            name: name.to_string(),
            label: format!("{} label", name),
            kind,
            required,
            options: Vec::new(),
            max_length: None,
        }
    }

    #[test]
    fn test_input_schema() {
        let mut lang = field("lang", InputKind::String, false);
        lang.options = vec!["en".to_string(), "fr".to_string()];
        let mut text = field("text", InputKind::String, true);
        text.max_length = Some(256);

        let schema = input_schema(&[
            text,
            lang,
            field("count", InputKind::Number, true),
            field("dry_run", InputKind::Boolean, false),
            field("docs", InputKind::FileList, false),
        ]);

        assert_eq!(schema["type"], "object");
        assert_eq!(
            schema["properties"]["text"],
            json!({"type": "string", "description": "text label", "maxLength": 256})
        );
        assert_eq!(schema["properties"]["lang"]["enum"], json!(["en", "fr"]));
        assert_eq!(schema["properties"]["count"]["type"], "number");
        assert_eq!(schema["properties"]["dry_run"]["type"], "boolean");
        assert_eq!(schema["properties"]["docs"]["type"], "array");
        assert_eq!(schema["properties"]["docs"]["items"]["type"], "object");
        assert_eq!(schema["required"], json!(["text", "count"]));
    }

    #[test]
    fn test_schema_without_required_fields() {
        let schema = input_schema(&[field("q", InputKind::String, false)]);
        assert!(!schema.contains_key("required"));
        assert!(input_schema(&[])["properties"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_collect_inputs() {
        let fields = [
            field("q", InputKind::String, true),
            field("n", InputKind::Number, false),
            field("dry", InputKind::Boolean, false),
        ];
        let arguments = json!({"q": "hello", "dry": true, "extra": "ignored"})
            .as_object()
            .unwrap()
            .clone();

        let inputs = collect_inputs(&fields, arguments);
        assert_eq!(
            Value::Object(inputs),
            json!({"q": "hello", "n": null, "dry": true})
        );
    }

    #[test]
    fn test_missing_string_input_is_empty() {
        let inputs = collect_inputs(&[field("q", InputKind::String, true)], JsonObject::new());
        assert_eq!(inputs["q"], "");
    }
}
