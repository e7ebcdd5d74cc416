//! Service document schema.
//!
//! Expanded service templates must deserialize against this schema
//! before they are written downstream; anything that does not fit is
//! rejected and the coordinate keeps its last known-good rendering.
//! Unknown fields are rejected so that typos in role declarations
//! surface as validation errors instead of silently dropped keys.

use serde::{Deserialize, Serialize};

/// A validated service document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDocument {
    /// Container image reference.
    pub image: String,

    /// Command override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Environment entries, in declaration order.
    #[serde(default)]
    pub env: Vec<EnvEntry>,

    /// Published ports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,

    /// Health check, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<HealthCheck>,

    /// Restart policy.
    #[serde(default)]
    pub restart: RestartPolicy,
}

/// A single environment entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

/// Health check declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheck {
    /// Check interval in seconds.
    #[serde(default = "default_check_interval")]
    pub interval_s: u64,

    /// HTTP path to probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,

    /// TCP port to probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<u16>,
}

fn default_check_interval() -> u64 {
    10
}

/// Restart policy for a materialized service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Always restart.
    #[default]
    Always,
    /// Restart only on non-zero exit.
    OnFailure,
    /// Never restart.
    Never,
}

impl ServiceDocument {
    /// Validate a JSON value against the schema.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Prepend a `HOST` environment entry bound to the node's IP.
    ///
    /// User-declared entries keep their order after it.
    pub fn with_host_env(mut self, ip: &str) -> Self {
        self.env.insert(
            0,
            EnvEntry {
                name: "HOST".to_string(),
                value: ip.to_string(),
            },
        );
        self
    }

    /// Serialize to the compact JSON written downstream.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
