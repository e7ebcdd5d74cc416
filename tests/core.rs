//! Tests for configuration loading and runtime construction.

use std::io::Write;
use tempfile::NamedTempFile;
use trellis::core::config::Config;
use trellis::core::runtime::Runtime;

/// Write a config file with the given content.
fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("failed to write config");
    file
}

#[test]
fn config_loads_from_file() {
    let file = config_file(
        r#"
[consul]
endpoint = "http://10.1.0.5:8500"

[prefixes]
nodes = "infra/nodes"
roles = "infra/roles"
services = "infra/services"

[query]
bind = "127.0.0.1:7300"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.consul.endpoint, "http://10.1.0.5:8500");
    assert_eq!(config.prefixes.nodes, "infra/nodes");
    assert_eq!(config.query.bind.as_deref(), Some("127.0.0.1:7300"));
}

#[test]
fn missing_file_is_an_error() {
    assert!(Config::from_file("/nonexistent/trellis.toml").is_err());
}

#[test]
fn runtime_rejects_invalid_config() {
    let file = config_file(
        r#"
[prefixes]
nodes = "same"
roles = "same"
services = "infra/services"
"#,
    );
    let config = Config::from_file(file.path()).unwrap();
    assert!(Runtime::new(config).is_err());
}

#[test]
fn runtime_accepts_valid_config() {
    let file = config_file(
        r#"
[prefixes]
nodes = "infra/nodes"
roles = "infra/roles"
services = "infra/services"
"#,
    );
    let config = Config::from_file(file.path()).unwrap();
    let runtime = Runtime::new(config).unwrap();
    assert_eq!(runtime.config().engine.put_retry_seconds, 5);
}
