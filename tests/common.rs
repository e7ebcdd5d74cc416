//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use trellis::core::config::PrefixesConfig;
use trellis::core::error::TrellisResult;
use trellis::engine::state::StateSnapshot;
use trellis::engine::{Engine, EngineHandle};
use trellis::kv::memory::MemoryKv;
use trellis::kv::KvClient;

/// Nodes prefix used throughout the tests.
pub const NODES: &str = "trellis/nodes";
/// Roles prefix used throughout the tests.
pub const ROLES: &str = "trellis/roles";
/// Services prefix used throughout the tests.
pub const SERVICES: &str = "trellis/services";

/// Standard test prefixes.
pub fn prefixes() -> PrefixesConfig {
    PrefixesConfig {
        nodes: NODES.to_string(),
        roles: ROLES.to_string(),
        services: SERVICES.to_string(),
    }
}

/// A running engine over an in-memory store.
pub struct TestEngine {
    pub kv: MemoryKv,
    pub handle: EngineHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<TrellisResult<()>>,
}

/// Spawn an engine over the given store with a short PUT retry.
pub fn spawn_engine(kv: MemoryKv) -> TestEngine {
    let engine = Engine::new(
        Arc::new(kv.clone()) as Arc<dyn KvClient>,
        prefixes(),
        Duration::from_millis(20),
    );
    let handle = engine.handle();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(engine.run(shutdown_rx));
    TestEngine {
        kv,
        handle,
        shutdown,
        task,
    }
}

impl TestEngine {
    /// Shut the engine down and return its outcome.
    pub async fn stop(self) -> TrellisResult<()> {
        let _ = self.shutdown.send(true);
        self.task.await.expect("engine task panicked")
    }

    /// Wait for the engine to terminate on its own (fatal paths).
    pub async fn wait(self) -> TrellisResult<()> {
        self.task.await.expect("engine task panicked")
    }
}

const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Poll a synchronous condition until it holds.
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(WAIT_INTERVAL).await;
    }
}

/// Poll the engine snapshot until a condition holds.
pub async fn eventually_state<F>(handle: &EngineHandle, what: &str, mut check: F)
where
    F: FnMut(&StateSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(snapshot) = handle.snapshot().await {
            if check(&snapshot) {
                return;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(WAIT_INTERVAL).await;
    }
}

/// Parse a materialized document from the store.
pub fn document_at(kv: &MemoryKv, node: &str, service: &str) -> Option<serde_json::Value> {
    let body = kv.get(&format!("{SERVICES}/{node}/{service}"))?;
    serde_json::from_str(&body).ok()
}
