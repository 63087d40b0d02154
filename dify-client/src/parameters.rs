//! Typed view of an application's input form
//!
//! `GET /parameters` describes inputs as a list of single-key objects whose
//! key names the UI control (`text-input`, `select`, `number`, ...). They are
//! parsed once into [`InputField`] so malformed forms are caught at startup.

use crate::de::{lenient_string, null_as_default};
use crate::error::FormError;
use crate::types::AppParameters;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Value kind accepted by an input field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    /// `text-input`, `paragraph` and `select` controls
    String,
    /// `number` controls
    Number,
    /// `checkbox` controls
    Boolean,
    /// A single file
    File,
    /// Several files
    FileList,
}

impl InputKind {
    /// Map a Dify control kind onto an input kind
    pub fn from_form_kind(kind: &str) -> Option<Self> {
        match kind {
            "text-input" | "paragraph" | "select" => Some(Self::String),
            "number" => Some(Self::Number),
            "checkbox" => Some(Self::Boolean),
            "file" => Some(Self::File),
            "file-list" => Some(Self::FileList),
            _ => None,
        }
    }

    /// The value sent upstream for an argument the caller left out
    pub fn empty_value(&self) -> Value {
        match self {
            Self::String => Value::String(String::new()),
            _ => Value::Null,
        }
    }

    /// JSON schema `type` for values of this kind
    pub fn json_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::File => "object",
            Self::FileList => "array",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::File => "file",
            Self::FileList => "file-list",
        };
        f.write_str(name)
    }
}

/// One declared workflow input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputField {
    /// Variable name used as the argument key
    pub name: String,
    /// Human label shown to callers
    pub label: String,
    pub kind: InputKind,
    pub required: bool,
    /// Allowed values of a `select` control
    pub options: Vec<String>,
    pub max_length: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FormControl {
    #[serde(deserialize_with = "lenient_string")]
    variable: String,
    #[serde(deserialize_with = "lenient_string")]
    label: String,
    #[serde(deserialize_with = "null_as_default")]
    required: bool,
    #[serde(deserialize_with = "null_as_default")]
    options: Vec<String>,
    max_length: Option<u64>,
}

/// JSON type name used in form errors
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl AppParameters {
    /// Parse the input form into typed fields, in declaration order
    ///
    /// A missing or null form declares no inputs.
    pub fn input_fields(&self) -> Result<Vec<InputField>, FormError> {
        let entries = match &self.user_input_form {
            Value::Null => return Ok(Vec::new()),
            Value::Array(entries) => entries,
            other => {
                return Err(FormError::NotAList {
                    found: json_kind(other),
                })
            }
        };

        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let entry = entry.as_object().ok_or_else(|| FormError::NotAnObject {
                    index,
                    found: json_kind(entry),
                })?;
                let mut controls = entry.iter();
                let (form_kind, body) = match (controls.next(), controls.next()) {
                    (Some(control), None) => control,
                    _ => {
                        return Err(FormError::AmbiguousEntry {
                            index,
                            found: entry.len(),
                        })
                    }
                };

                let kind = InputKind::from_form_kind(form_kind).ok_or_else(|| {
                    FormError::UnsupportedKind {
                        index,
                        kind: form_kind.clone(),
                    }
                })?;

                let control =
                    FormControl::deserialize(body).map_err(|source| FormError::Malformed {
                        index,
                        kind: form_kind.clone(),
                        source,
                    })?;
                if control.variable.is_empty() {
                    return Err(FormError::MissingVariable {
                        index,
                        kind: form_kind.clone(),
                    });
                }

                let label = if control.label.is_empty() {
                    control.variable.clone()
                } else {
                    control.label
                };
                Ok(InputField {
                    name: control.variable,
                    label,
                    kind,
                    required: control.required,
                    options: control.options,
                    max_length: control.max_length,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(form: Value) -> AppParameters {
        serde_json::from_value(json!({ "user_input_form": form })).unwrap()
    }

    #[test]
    fn test_parses_all_supported_controls() {
        let fields = params(json!([
            {"text-input": {"variable": "q", "label": "Query", "required": true, "max_length": 48}},
            {"paragraph": {"variable": "body", "label": "Body", "required": false}},
            {"select": {"variable": "lang", "label": "Language", "options": ["en", "fr"]}},
            {"number": {"variable": "n", "label": "Count"}},
            {"checkbox": {"variable": "dry", "label": "Dry run"}},
            {"file": {"variable": "doc", "label": "Document"}},
            {"file-list": {"variable": "docs", "label": "Documents"}}
        ]))
        .input_fields()
        .unwrap();

        let kinds: Vec<InputKind> = fields.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                InputKind::String,
                InputKind::String,
                InputKind::String,
                InputKind::Number,
                InputKind::Boolean,
                InputKind::File,
                InputKind::FileList
            ]
        );
        assert_eq!(fields[0].name, "q");
        assert!(fields[0].required);
        assert_eq!(fields[0].max_length, Some(48));
        assert!(!fields[1].required);
        assert_eq!(fields[2].options, vec!["en", "fr"]);
    }

    #[test]
    fn test_missing_label_falls_back_to_variable() {
        let fields = params(json!([{"text-input": {"variable": "q", "label": null}}]))
            .input_fields()
            .unwrap();
        assert_eq!(fields[0].label, "q");
        assert!(!fields[0].required);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = params(json!([
            {"text-input": {"variable": "q"}},
            {"external_data_tool": {"variable": "x"}}
        ]))
        .input_fields()
        .unwrap_err();
        assert!(
            matches!(err, FormError::UnsupportedKind { index: 1, ref kind } if kind == "external_data_tool")
        );
    }

    #[test]
    fn test_missing_variable_is_rejected() {
        let err = params(json!([{"number": {"label": "Count"}}]))
            .input_fields()
            .unwrap_err();
        assert!(matches!(err, FormError::MissingVariable { index: 0, .. }));
    }

    #[test]
    fn test_entry_with_two_controls_is_rejected() {
        let err = params(json!([{"number": {"variable": "a"}, "checkbox": {"variable": "b"}}]))
            .input_fields()
            .unwrap_err();
        assert!(matches!(err, FormError::AmbiguousEntry { index: 0, found: 2 }));
    }

    #[test]
    fn test_wrongly_typed_control_is_malformed() {
        let err = params(json!([{"select": {"variable": "a", "options": "en"}}]))
            .input_fields()
            .unwrap_err();
        assert!(matches!(err, FormError::Malformed { index: 0, .. }));
    }

    #[test]
    fn test_non_object_entry_is_rejected() {
        let err = params(json!(["garbage", {"text-input": {"variable": "q"}}]))
            .input_fields()
            .unwrap_err();
        assert!(matches!(err, FormError::NotAnObject { index: 0, found: "string" }));
        assert_eq!(
            err.to_string(),
            "input form entry #0 must be an object, found string"
        );
    }

    #[test]
    fn test_form_that_is_not_a_list_is_rejected() {
        let err = params(json!("oops")).input_fields().unwrap_err();
        assert!(matches!(err, FormError::NotAList { found: "string" }));

        let err = params(json!({"text-input": {"variable": "q"}}))
            .input_fields()
            .unwrap_err();
        assert!(matches!(err, FormError::NotAList { found: "object" }));
    }

    #[test]
    fn test_absent_form_declares_no_inputs() {
        assert!(params(Value::Null).input_fields().unwrap().is_empty());
        assert!(AppParameters::default().input_fields().unwrap().is_empty());
        assert!(params(json!([])).input_fields().unwrap().is_empty());
    }

    #[test]
    fn test_empty_values() {
        assert_eq!(InputKind::String.empty_value(), json!(""));
        assert_eq!(InputKind::Number.empty_value(), Value::Null);
        assert_eq!(InputKind::FileList.empty_value(), Value::Null);
    }
}
