//! Dict-shaped API objects

use serde_json::{Map, Value};

use crate::error::{SharedResult, SharedTypeError};

/// One API resource instance as returned by (or sent to) the Proxmox API.
pub type ManagedObject = Map<String, Value>;

/// Copy of `object` without null fields. A null desired field means
/// "don't care", so it never takes part in a comparison or a payload.
pub fn strip_nulls(object: &ManagedObject) -> ManagedObject {
    object
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Render a scalar the way it travels over the wire (form encoded).
///
/// Booleans become `1`/`0`, numbers and strings their plain text, arrays a
/// comma separated list. `None` for nulls and nested objects.
pub fn wire_string(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Object(_) => None,
        Value::Bool(flag) => Some(if *flag { "1" } else { "0" }.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(wire_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

/// Sort the members of a comma separated list, dropping empty members.
pub fn sorted_csv(value: &str) -> String {
    let mut members: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|member| !member.is_empty())
        .collect();
    members.sort_unstable();
    members.join(",")
}

pub fn object_from_value(value: Value) -> SharedResult<ManagedObject> {
    match value {
        Value::Object(object) => Ok(object),
        other => Err(SharedTypeError::UnexpectedShape {
            expected: "object",
            found: describe(&other),
        }),
    }
}

/// Interpret an API response as a list of objects. A null body is an
/// empty collection.
pub fn list_from_value(value: Value) -> SharedResult<Vec<ManagedObject>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.into_iter().map(object_from_value).collect(),
        other => Err(SharedTypeError::UnexpectedShape {
            expected: "list of objects",
            found: describe(&other),
        }),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(_) => "list".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}
