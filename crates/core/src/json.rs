//! JSON concatenation convention.
//!
//! JSON streams store every item as minified JSON followed by a single comma:
//! `item1,item2,...,itemN,`. Appending new items is O(bytes added) because
//! nothing already stored is ever re-serialized; readers strip the final
//! comma and wrap the whole buffer in `[` `]`.

use serde_json::Value;

use crate::error::StoreError;

/// Parse a request body into stream items.
///
/// Arrays are flattened into their elements; an object is a single item.
/// Anything else (scalars, unparseable bytes) is rejected. `allow_empty`
/// distinguishes create (empty arrays permitted, storing nothing) from
/// append (at least one item required).
pub fn parse_items(body: &[u8], allow_empty: bool) -> Result<Vec<Value>, StoreError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| StoreError::InvalidJson(e.to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        other => {
            return Err(StoreError::InvalidJson(format!(
                "expected a JSON array or object, got {}",
                type_name(&other)
            )));
        }
    };
    if items.is_empty() && !allow_empty {
        return Err(StoreError::InvalidJson(
            "empty arrays are not allowed on append".to_string(),
        ));
    }
    Ok(items)
}

/// Serialize items into the internal trailing-comma form.
pub fn stitch_items(items: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        // serde_json emits minified output for Value.
        out.extend(serde_json::to_vec(item).unwrap_or_default());
        out.push(b',');
    }
    out
}

/// Wrap stored bytes into the response array: strip the trailing comma, add
/// brackets. An empty buffer reads as `[]`.
pub fn wrap_response(mut data: Vec<u8>) -> Vec<u8> {
    while data.last() == Some(&b',') {
        data.pop();
    }
    let mut out = Vec::with_capacity(data.len() + 2);
    out.push(b'[');
    out.extend(data);
    out.push(b']');
    out
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
