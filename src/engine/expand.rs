//! Template expansion.
//!
//! A service template is a symbolic tree that may embed
//! `#condo/watcher "key"` references. Expansion substitutes each
//! reference with the watcher's current value (non-recursively),
//! converts the result to JSON, validates it against the service
//! document schema, and injects the `HOST` environment entry.

use crate::core::error::{TrellisError, TrellisResult};
use crate::document::ServiceDocument;
use crate::edn::{self, Value};
use crate::engine::state::Node;
use crate::engine::watchers::Watcher;
use std::collections::BTreeMap;

/// Tag marking a watcher reference inside a template.
pub const WATCHER_TAG: &str = "condo/watcher";

/// Collect every watcher key referenced anywhere in `value`.
///
/// A `#condo/watcher` node whose payload is not a string literal is a
/// structural error in the role declaration; it is logged and omitted.
pub fn find_watchers(value: &Value) -> Vec<String> {
    let mut keys = Vec::new();
    collect(value, &mut keys);
    keys
}

fn collect(value: &Value, keys: &mut Vec<String>) {
    match value {
        Value::Tagged { tag, value: payload } if tag == WATCHER_TAG => match payload.as_str() {
            Some(key) => keys.push(key.to_string()),
            None => tracing::error!(
                payload = %payload,
                "watcher reference payload must be a string literal; omitting"
            ),
        },
        Value::List(items) | Value::Vector(items) | Value::Set(items) => {
            for item in items {
                collect(item, keys);
            }
        }
        Value::Map(pairs) => {
            for (key, val) in pairs {
                collect(key, keys);
                collect(val, keys);
            }
        }
        _ => {}
    }
}

/// Replace watcher references with their current values.
///
/// Replacement values are spliced in as-is; references inside them are
/// not expanded. Precondition: the registry holds every key returned
/// by [`find_watchers`] for this template.
fn substitute(value: &Value, watchers: &BTreeMap<String, Watcher>) -> Value {
    match value {
        Value::Tagged { tag, value: payload } if tag == WATCHER_TAG => {
            if let Some(key) = payload.as_str() {
                match watchers.get(key) {
                    Some(watcher) => watcher.value.clone(),
                    None => {
                        debug_assert!(false, "watcher {key} not registered before expansion");
                        value.clone()
                    }
                }
            } else {
                value.clone()
            }
        }
        Value::List(items) => Value::List(items.iter().map(|i| substitute(i, watchers)).collect()),
        Value::Vector(items) => {
            Value::Vector(items.iter().map(|i| substitute(i, watchers)).collect())
        }
        Value::Set(items) => Value::Set(items.iter().map(|i| substitute(i, watchers)).collect()),
        Value::Map(pairs) => Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (substitute(k, watchers), substitute(v, watchers)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Expand a template for a node and render the document string.
///
/// Returns the schema-validated JSON with `HOST` bound to the node's
/// IP at the head of the environment list. A schema rejection yields
/// an error; the caller decides what to do with the coordinate.
pub fn render(
    template: &Value,
    watchers: &BTreeMap<String, Watcher>,
    node: &Node,
) -> TrellisResult<String> {
    let expanded = substitute(template, watchers);
    let json = edn::to_json(&expanded);
    let document = ServiceDocument::from_json(json)
        .map_err(|e| TrellisError::schema(e.to_string()))?
        .with_host_env(&node.ip);
    document
        .to_json_string()
        .map_err(|e| TrellisError::schema(e.to_string()))
}
