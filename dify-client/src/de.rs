//! Lenient field decoders for upstream payloads
//!
//! The Dify API is loose about field types: optional strings arrive as
//! `null`, prices arrive either quoted or as bare numbers, and counters are
//! sometimes omitted. Absent or null fields decode to their zero value.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Decode `null` as `T::default()`
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode any scalar as text; `null` becomes the empty string
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    })
}

/// Decode a number, a numeric string, or anything else as zero
///
/// Telemetry fields such as `elapsed_time` have arrived quoted; a mistyped
/// counter must not cost the whole event.
pub(crate) fn lenient_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + FromStr + DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => serde_json::from_value(Value::Number(number)).unwrap_or_default(),
        Value::String(text) => text.trim().parse().unwrap_or_default(),
        _ => T::default(),
    })
}

/// Decode a nested object; any other shape becomes `T::default()`
pub(crate) fn lenient_object<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        object @ Value::Object(_) => serde_json::from_value(object).unwrap_or_default(),
        _ => T::default(),
    })
}

/// Like [`lenient_string`] but `null` and `""` both become `None`
pub(crate) fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = lenient_string(deserializer)?;
    Ok((!text.is_empty()).then_some(text))
}

/// Accept a list of objects, a single object, or `null`
pub(crate) fn mapping_sequence<'de, D>(deserializer: D) -> Result<Vec<Map<String, Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    })
}
