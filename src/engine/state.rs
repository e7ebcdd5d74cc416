//! In-memory state model.
//!
//! The state is a plain value holding four indices: nodes, roles,
//! watchers, and the materialized (node, service) → document map. It is
//! mutated by the reconciler only; everyone else sees owned snapshots.

use crate::core::error::{TrellisError, TrellisResult};
use crate::edn::{self, Value};
use crate::engine::watchers::Watcher;
use crate::matcher::{self, Matcher};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Node name (final segment of its KV key).
    pub name: String,
    /// Advertised IP address.
    pub ip: String,
    /// Tag dictionary, in declaration order.
    pub tags: IndexMap<String, String>,
}

/// Wire format of a node record.
#[derive(Debug, Deserialize)]
struct NodeRecord {
    ip: String,
    #[serde(default)]
    tags: IndexMap<String, String>,
}

impl Node {
    /// Decode a node record published by the registrar.
    pub fn parse(name: &str, raw: &str) -> TrellisResult<Self> {
        let record: NodeRecord =
            serde_json::from_str(raw).map_err(|e| TrellisError::NodeRecord {
                key: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            name: name.to_string(),
            ip: record.ip,
            tags: record.tags,
        })
    }
}

/// An installed role.
#[derive(Debug, Clone)]
pub struct Role {
    /// Role key (final segment of its KV key).
    pub key: String,
    /// Compiled node matcher.
    pub matcher: Matcher,
    /// Declared services: (name, document template), in declaration order.
    pub services: Vec<(String, Value)>,
    /// Names of currently matched nodes. Derived, never authoritative.
    pub nodes: Vec<String>,
}

impl Role {
    /// Decode and compile a role record.
    ///
    /// The record is a symbolic map with `:matcher` and `:services`
    /// keys. Service names that are not keywords are logged and
    /// skipped; a matcher that fails to compile rejects the role.
    pub fn parse(key: &str, raw: &str) -> TrellisResult<Self> {
        let record = edn::parse(raw).map_err(|e| TrellisError::RoleRecord {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let matcher_expr = record.get("matcher").ok_or_else(|| TrellisError::RoleRecord {
            key: key.to_string(),
            message: "missing :matcher".to_string(),
        })?;
        let matcher = matcher::compile(matcher_expr)?;

        let services_value = record.get("services").ok_or_else(|| TrellisError::RoleRecord {
            key: key.to_string(),
            message: "missing :services".to_string(),
        })?;
        let pairs = match services_value {
            Value::Map(pairs) => pairs,
            other => {
                return Err(TrellisError::RoleRecord {
                    key: key.to_string(),
                    message: format!(":services must be a map, got {}", other.kind()),
                })
            }
        };

        let mut services = Vec::with_capacity(pairs.len());
        for (name, template) in pairs {
            match name.as_keyword() {
                Some(service) => services.push((service.to_string(), template.clone())),
                None => tracing::warn!(
                    role = %key,
                    name = %name,
                    "service name is not a keyword; skipping"
                ),
            }
        }

        Ok(Self {
            key: key.to_string(),
            matcher,
            services,
            nodes: Vec::new(),
        })
    }
}

/// A (node, service) coordinate in the materialized map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coordinate {
    pub node: String,
    pub service: String,
}

impl Coordinate {
    pub fn new(node: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            service: service.into(),
        }
    }
}

/// The engine's complete in-memory state.
#[derive(Default)]
pub struct State {
    /// Registered nodes by name.
    pub nodes: BTreeMap<String, Node>,
    /// Installed roles by key.
    pub roles: BTreeMap<String, Role>,
    /// Live watchers by key.
    pub watchers: BTreeMap<String, Watcher>,
    /// Materialized (node, service) → rendered document.
    pub vkv: BTreeMap<Coordinate, String>,
}

impl State {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an owned, serializable view for the query endpoint.
    pub fn snapshot(&self) -> StateSnapshot {
        let roles = self
            .roles
            .values()
            .map(|role| RoleView {
                key: role.key.clone(),
                nodes: role.nodes.clone(),
                services: role.services.iter().map(|(name, _)| name.clone()).collect(),
            })
            .collect();

        let nodes = self
            .nodes
            .values()
            .map(|node| NodeView {
                ip: node.ip.clone(),
                name: node.name.clone(),
                tags: node.tags.clone(),
                roles: self
                    .roles
                    .values()
                    .filter(|role| role.nodes.iter().any(|n| n == &node.name))
                    .map(|role| role.key.clone())
                    .collect(),
            })
            .collect();

        let watchers = self
            .watchers
            .values()
            .map(|watcher| WatcherView {
                key: watcher.key.clone(),
                roles: watcher.roles.clone(),
                watcher_value: edn::to_json(&watcher.value),
            })
            .collect();

        StateSnapshot {
            roles,
            nodes,
            watchers,
        }
    }
}

/// Serializable view of the full state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub roles: Vec<RoleView>,
    pub nodes: Vec<NodeView>,
    pub watchers: Vec<WatcherView>,
}

/// Role view: key, matched nodes, declared service names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleView {
    pub key: String,
    pub nodes: Vec<String>,
    pub services: Vec<String>,
}

/// Node view: identity plus the derived list of selecting roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeView {
    pub ip: String,
    pub name: String,
    pub tags: IndexMap<String, String>,
    pub roles: Vec<String>,
}

/// Watcher view: key, referencing roles, current value as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherView {
    pub key: String,
    pub roles: Vec<String>,
    pub watcher_value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_parse_keeps_tag_order() {
        let node = Node::parse("alpha", r#"{"ip":"10.0.0.1","tags":{"z":"1","a":"2"}}"#).unwrap();
        assert_eq!(node.ip, "10.0.0.1");
        let keys: Vec<&str> = node.tags.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn node_parse_defaults_tags() {
        let node = Node::parse("alpha", r#"{"ip":"10.0.0.1"}"#).unwrap();
        assert!(node.tags.is_empty());
    }

    #[test]
    fn node_parse_rejects_garbage() {
        assert!(Node::parse("alpha", "not json").is_err());
        assert!(Node::parse("alpha", r#"{"tags":{}}"#).is_err());
    }

    #[test]
    fn role_parse_extracts_matcher_and_services() {
        let role = Role::parse(
            "web",
            r#"{:matcher (eq :dc "eu") :services {:app {:image "web:1"} :sidecar {:image "envoy:2"}}}"#,
        )
        .unwrap();
        assert_eq!(role.key, "web");
        let names: Vec<&str> = role.services.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["app", "sidecar"]);
    }

    #[test]
    fn role_parse_skips_non_keyword_service_names() {
        let role = Role::parse(
            "web",
            r#"{:matcher (eq :dc "eu") :services {"app" {:image "a"} :ok {:image "b"}}}"#,
        )
        .unwrap();
        let names: Vec<&str> = role.services.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["ok"]);
    }

    #[test]
    fn role_parse_rejects_bad_records() {
        assert!(Role::parse("web", "(not a map)").is_err());
        assert!(Role::parse("web", r#"{:services {}}"#).is_err());
        assert!(Role::parse("web", r#"{:matcher (eq :a "b")}"#).is_err());
        // Bad matcher operator rejects the role.
        assert!(Role::parse("web", r#"{:matcher (xor :a :b) :services {}}"#).is_err());
        assert!(Role::parse("web", r#"{:matcher (eq :a "b") :services [:app]}"#).is_err());
    }
}
