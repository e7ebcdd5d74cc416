//! KV store client interface.
//!
//! The engine consumes a Consul-style coordination store through the
//! [`KvClient`] trait: long-lived prefix watches feeding change events,
//! single-key watches whose first element is the current value, and
//! plain PUT/DELETE for the materialized output. Two implementations
//! are provided: [`consul::ConsulKv`] (HTTP long polling) and
//! [`memory::MemoryKv`] (embedded mode and tests).

pub mod consul;
pub mod memory;

use crate::core::error::TrellisResult;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A change observed under a watched prefix.
///
/// Ordering within one watch stream reflects remote ordering. A fresh
/// watch first reports every existing key as `New`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixChange {
    /// A key appeared.
    New { key: String, value: String },
    /// A key's value changed.
    Updated { key: String, value: String },
    /// A key disappeared.
    Removed { key: String },
}

/// Stop handle for a watch task.
pub struct WatchHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Handle for a watch backed by a task.
    pub fn new(stop: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { stop, task }
    }

    /// Signal the watch to stop and wait for its task to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// An active prefix watch.
pub struct PrefixWatch {
    /// Change stream.
    pub events: mpsc::UnboundedReceiver<PrefixChange>,
    /// Stop handle.
    pub handle: WatchHandle,
}

/// An active single-key watch.
///
/// The first element is the key's current value (`None` if absent);
/// subsequent elements are updates. The stream ending without a stop
/// is surfaced by the engine as a fatal condition.
pub struct KeyWatch {
    /// Value stream.
    pub values: mpsc::UnboundedReceiver<Option<String>>,
    /// Stop handle.
    pub handle: WatchHandle,
}

/// Client interface to the coordination store.
///
/// Object-safe so the engine can hold `Arc<dyn KvClient>`.
pub trait KvClient: Send + Sync {
    /// Watch every key under a prefix.
    fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = TrellisResult<PrefixWatch>> + Send + '_>>;

    /// Watch a single key.
    fn watch_key(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = TrellisResult<KeyWatch>> + Send + '_>>;

    /// Write a value.
    fn put(
        &self,
        path: &str,
        body: &str,
    ) -> Pin<Box<dyn Future<Output = TrellisResult<()>> + Send + '_>>;

    /// Delete a key.
    fn delete(&self, path: &str) -> Pin<Box<dyn Future<Output = TrellisResult<()>> + Send + '_>>;
}

/// Final path segment of a KV key.
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_takes_final_segment() {
        assert_eq!(basename("trellis/nodes/alpha"), "alpha");
        assert_eq!(basename("alpha"), "alpha");
        assert_eq!(basename("a/b/c/d"), "d");
    }
}
