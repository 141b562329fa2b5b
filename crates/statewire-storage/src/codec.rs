#![forbid(unsafe_code)]

//! Conversion between state values and JSON documents.
//!
//! Wrapped objects are serialized by content: the handle is resolved through
//! the runtime and its fields are written recursively. Decoding always yields
//! unwrapped content ([`Value::Raw`]); it is wrapped when stored into a
//! property.
//!
//! | `Value`          | JSON                                  |
//! |------------------|---------------------------------------|
//! | `Null`           | `null`                                |
//! | `Bool`           | boolean                               |
//! | `Int`            | integer                               |
//! | `Float`          | number (`null` when not finite)       |
//! | `Str`            | string                                |
//! | `Object`/`Raw`   | object (map) or array (list)          |

use serde_json::{Map, Number};
use tracing::warn;

use statewire_core::{ObjectHandle, RawObject, Runtime, Value};

/// Encode a value as JSON, resolving wrapped objects through `runtime`.
///
/// Destroyed handles and self-referencing objects encode as `null`.
pub fn to_json(runtime: &Runtime, value: &Value) -> serde_json::Value {
    let mut visiting = Vec::new();
    encode(runtime, value, &mut visiting)
}

fn encode(
    runtime: &Runtime,
    value: &Value,
    visiting: &mut Vec<ObjectHandle>,
) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::Number(Number::from(*n)),
        Value::Float(x) => {
            Number::from_f64(*x).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Raw(raw) => encode_raw(runtime, raw, visiting),
        Value::Object(handle) => {
            if visiting.contains(handle) {
                warn!(handle = ?handle, "cyclic object reference encoded as null");
                return serde_json::Value::Null;
            }
            let Some(raw) = runtime.unwrap(*handle) else {
                warn!(handle = ?handle, "destroyed object encoded as null");
                return serde_json::Value::Null;
            };
            visiting.push(*handle);
            let json = encode_raw(runtime, &raw, visiting);
            visiting.pop();
            json
        }
    }
}

fn encode_raw(
    runtime: &Runtime,
    raw: &RawObject,
    visiting: &mut Vec<ObjectHandle>,
) -> serde_json::Value {
    match raw {
        RawObject::Map(fields) => {
            let mut map = Map::new();
            for (key, value) in fields {
                map.insert(key.clone(), encode(runtime, value, visiting));
            }
            serde_json::Value::Object(map)
        }
        RawObject::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| encode(runtime, item, visiting))
                .collect(),
        ),
    }
}

/// Decode JSON into an unwrapped value.
///
/// Integers outside the `i64` range decode as floats.
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Raw(RawObject::List(items.iter().map(from_json).collect()))
        }
        serde_json::Value::Object(map) => Value::Raw(RawObject::Map(
            map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect(),
        )),
    }
}
