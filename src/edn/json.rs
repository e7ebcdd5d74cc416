//! Conversion of symbolic values to JSON.
//!
//! Used by the template expander (before schema validation) and by the
//! query endpoint (watcher values in the state snapshot).

use super::Value;

/// Convert a symbolic value to a JSON value.
///
/// Keywords and symbols become their name strings, maps become objects
/// (key order preserved), lists/vectors/sets become arrays, and tagged
/// literals collapse to the JSON of their payload. Map keys that are
/// not strings, keywords, or symbols use the printed form.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Keyword(k) => serde_json::Value::String(k.clone()),
        Value::Symbol(s) => serde_json::Value::String(s.clone()),
        Value::List(items) | Value::Vector(items) | Value::Set(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect())
        }
        Value::Map(pairs) => {
            let mut object = serde_json::Map::with_capacity(pairs.len());
            for (k, v) in pairs {
                let key = match k {
                    Value::String(s) => s.clone(),
                    Value::Keyword(name) | Value::Symbol(name) => name.clone(),
                    other => other.to_string(),
                };
                object.insert(key, to_json(v));
            }
            serde_json::Value::Object(object)
        }
        Value::Tagged { value, .. } => to_json(value),
    }
}
