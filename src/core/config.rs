//! Configuration parsing and validation.
//!
//! Trellis configuration is loaded from a TOML file with a CLI
//! override for the path. Sections mirror the engine's collaborators:
//! the Consul agent, the three KV prefixes, the optional query
//! endpoint, and engine tuning knobs.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level Trellis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Consul agent connection.
    #[serde(default)]
    pub consul: ConsulConfig,

    /// KV path prefixes.
    pub prefixes: PrefixesConfig,

    /// Query endpoint configuration.
    #[serde(default)]
    pub query: QueryConfig,

    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Consul agent connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Agent HTTP endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// ACL token, if the agent requires one.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
        }
    }
}

/// The three KV prefixes the engine works against.
///
/// Node and role names are the final path segment of their keys;
/// services are written under `services/<node>/<service>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixesConfig {
    /// Prefix holding node registrations.
    pub nodes: String,
    /// Prefix holding role declarations.
    pub roles: String,
    /// Prefix owned by the engine for materialized services.
    pub services: String,
}

/// Query endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Bind address; absent disables the endpoint.
    #[serde(default)]
    pub bind: Option<String>,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between PUT retries against the services prefix.
    #[serde(default = "default_put_retry_seconds")]
    pub put_retry_seconds: u64,

    /// Long-poll wait for blocking queries, in seconds.
    #[serde(default = "default_watch_wait_seconds")]
    pub watch_wait_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            put_retry_seconds: default_put_retry_seconds(),
            watch_wait_seconds: default_watch_wait_seconds(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_put_retry_seconds() -> u64 {
    5
}

fn default_watch_wait_seconds() -> u64 {
    55
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("failed to parse config")?;
        Ok(config)
    }

    /// Validate semantic constraints.
    pub fn validate(&self) -> Result<()> {
        if !self.consul.endpoint.starts_with("http://")
            && !self.consul.endpoint.starts_with("https://")
        {
            bail!(
                "consul.endpoint must be an http(s) URL, got {:?}",
                self.consul.endpoint
            );
        }

        for (label, prefix) in [
            ("prefixes.nodes", &self.prefixes.nodes),
            ("prefixes.roles", &self.prefixes.roles),
            ("prefixes.services", &self.prefixes.services),
        ] {
            if prefix.is_empty() {
                bail!("{label} must not be empty");
            }
            if prefix.starts_with('/') || prefix.ends_with('/') {
                bail!("{label} must not have leading or trailing slashes, got {prefix:?}");
            }
        }
        if self.prefixes.nodes == self.prefixes.roles
            || self.prefixes.nodes == self.prefixes.services
            || self.prefixes.roles == self.prefixes.services
        {
            bail!("prefixes.nodes, prefixes.roles, and prefixes.services must be distinct");
        }

        if let Some(bind) = &self.query.bind {
            bind.parse::<SocketAddr>()
                .with_context(|| format!("query.bind is not a socket address: {bind:?}"))?;
        }

        if self.engine.put_retry_seconds == 0 {
            bail!("engine.put_retry_seconds must be at least 1");
        }
        if self.engine.watch_wait_seconds == 0 {
            bail!("engine.watch_wait_seconds must be at least 1");
        }
        Ok(())
    }

    /// PUT retry interval as a duration.
    pub fn put_retry(&self) -> Duration {
        Duration::from_secs(self.engine.put_retry_seconds)
    }

    /// Long-poll wait as a duration.
    pub fn watch_wait(&self) -> Duration {
        Duration::from_secs(self.engine.watch_wait_seconds)
    }

    /// Parsed query bind address, if the endpoint is enabled.
    ///
    /// `validate` must have accepted the config first.
    pub fn query_bind(&self) -> Option<SocketAddr> {
        self.query.bind.as_ref().and_then(|bind| bind.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[prefixes]
nodes = "trellis/nodes"
roles = "trellis/roles"
services = "trellis/services"
"#;

    #[test]
    fn minimal_config_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.consul.endpoint, "http://127.0.0.1:8500");
        assert_eq!(config.engine.put_retry_seconds, 5);
        assert_eq!(config.engine.watch_wait_seconds, 55);
        assert!(config.query.bind.is_none());
        assert!(config.query_bind().is_none());
    }

    #[test]
    fn full_config_parses() {
        let config = Config::from_toml(
            r#"
[consul]
endpoint = "https://consul.internal:8501"
token = "secret"

[prefixes]
nodes = "infra/nodes"
roles = "infra/roles"
services = "infra/services"

[query]
bind = "127.0.0.1:7300"

[engine]
put_retry_seconds = 2
watch_wait_seconds = 30
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.consul.token.as_deref(), Some("secret"));
        assert_eq!(config.put_retry(), Duration::from_secs(2));
        assert_eq!(
            config.query_bind(),
            Some("127.0.0.1:7300".parse().unwrap())
        );
    }

    #[test]
    fn missing_prefixes_rejected() {
        assert!(Config::from_toml("[consul]\n").is_err());
    }

    #[test]
    fn validation_failures() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.consul.endpoint = "consul.internal:8500".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.prefixes.roles = "/trellis/roles".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.prefixes.roles = config.prefixes.nodes.clone();
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.query.bind = Some("not-an-address".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.engine.put_retry_seconds = 0;
        assert!(config.validate().is_err());
    }
}
