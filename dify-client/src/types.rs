//! Request and metadata types of the Dify service API

use crate::de::{lenient_string, null_as_default};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default upstream user identifier
pub const DEFAULT_USER: &str = "mcp-user";

/// How the upstream should deliver a run's result
///
/// Only the event stream is used; results are assembled from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Server-sent event stream of progress events
    #[default]
    Streaming,
}

/// A file handed to a workflow run through its file upload (`sys.files`)
///
/// Also the shape callers pass in the tool's `files` argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileAttachment {
    /// Kind of file, e.g. `image` or `document`
    #[serde(rename = "type")]
    pub file_type: String,
    /// `remote_url` or `local_file`
    pub transfer_method: String,
    /// Location for `remote_url` transfers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Id returned by the upload endpoint for `local_file` transfers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upload_file_id: String,
}

/// Body of `POST /workflows/run`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRunRequest {
    pub inputs: Map<String, Value>,
    pub response_mode: ResponseMode,
    pub user: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
}

impl WorkflowRunRequest {
    /// A streaming run with the given inputs on behalf of `user`
    pub fn streaming(inputs: Map<String, Value>, user: impl Into<String>) -> Self {
        Self {
            inputs,
            response_mode: ResponseMode::Streaming,
            user: user.into(),
            files: Vec::new(),
        }
    }

    /// Attach files to the run
    pub fn with_files(mut self, files: Vec<FileAttachment>) -> Self {
        self.files = files;
        self
    }
}

/// Response of `GET /info`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct AppInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}

/// Response of `GET /parameters`
///
/// Kept as received; [`AppParameters::input_fields`] validates the form.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct AppParameters {
    /// One single-key object per input control, keyed by control kind
    pub user_input_form: Value,
    pub file_upload: Value,
    pub system_parameters: Value,
}

impl AppParameters {
    /// Whether the app takes files through its file upload
    ///
    /// Newer apps set `file_upload.enabled`; older ones enable a per-kind
    /// section such as `file_upload.image.enabled`.
    pub fn accepts_files(&self) -> bool {
        fn enabled(section: &Value) -> bool {
            section
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        }
        enabled(&self.file_upload)
            || self
                .file_upload
                .as_object()
                .is_some_and(|sections| sections.values().any(enabled))
    }
}
