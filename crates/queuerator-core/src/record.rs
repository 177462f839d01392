//! Record decoding
//!
//! A record is the structured form of one inbound message: a mapping of field
//! names to JSON values. `serde_json::Value` is the closed tagged union
//! {Null, Bool, Number, String, Array, Object} every comparison operates on.

use crate::error::{QueueratorError, Result};
use serde_json::{Map, Value};

/// Decoded message body
pub type Record = Map<String, Value>;

/// Decode a raw payload into a record.
///
/// The payload must be a JSON document whose top level is an object.
pub fn decode(payload: &[u8]) -> Result<Record> {
    if payload.is_empty() {
        return Err(QueueratorError::decode("empty payload"));
    }

    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(QueueratorError::decode(format!(
            "expected an object at the top level, found {}",
            kind_name(&other)
        ))),
        Err(e) => Err(QueueratorError::decode_with_source("invalid JSON payload", e)),
    }
}

/// Resolve a dotted path inside a record.
///
/// Objects are traversed by key and arrays by numeric index, so
/// `"readings.0.value"` reaches into the first element of `readings`.
pub fn lookup<'a>(record: &'a Record, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = record.get(first)?;

    for part in rest {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                let idx: usize = part.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// Human-readable kind of a value, used in diagnostics
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
