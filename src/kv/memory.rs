//! In-memory KV store.
//!
//! Backs embedded mode and the test suite. Watch semantics mirror the
//! Consul client: a fresh prefix watch first reports every existing
//! key as `New`, and a key watch's first element is the current value.
//! Tests can inject PUT failures to exercise the engine's retry path.

use super::{KeyWatch, KvClient, PrefixChange, PrefixWatch, WatchHandle};
use crate::core::error::{TrellisError, TrellisResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// A write that reached the store, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// Successful PUT.
    Put { path: String, body: String },
    /// Successful DELETE.
    Delete { path: String },
}

struct PrefixSub {
    id: u64,
    prefix: String,
    tx: mpsc::UnboundedSender<PrefixChange>,
}

struct KeySub {
    id: u64,
    key: String,
    tx: mpsc::UnboundedSender<Option<String>>,
}

#[derive(Default)]
struct Inner {
    data: RwLock<BTreeMap<String, String>>,
    prefix_subs: RwLock<Vec<PrefixSub>>,
    key_subs: RwLock<Vec<KeySub>>,
    next_sub_id: AtomicU64,
    /// Remaining injected PUT failures per path.
    put_failures: RwLock<HashMap<String, u32>>,
    /// Total PUT attempts per path, including failed ones.
    put_attempts: RwLock<HashMap<String, u32>>,
    log: RwLock<Vec<KvOp>>,
}

/// Shared in-memory KV store.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Inner>,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a key as an external actor (registrar, operator).
    ///
    /// Unlike [`KvClient::put`], this bypasses failure injection and
    /// the operation log.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let previous = self.inner.data.write().insert(key.clone(), value.clone());
        let change = match previous {
            None => PrefixChange::New {
                key: key.clone(),
                value: value.clone(),
            },
            Some(_) => PrefixChange::Updated {
                key: key.clone(),
                value: value.clone(),
            },
        };
        self.notify_prefix(&key, change);
        self.notify_key(&key, Some(value));
    }

    /// Remove a key as an external actor.
    pub fn remove(&self, key: &str) {
        if self.inner.data.write().remove(key).is_some() {
            self.notify_prefix(
                key,
                PrefixChange::Removed {
                    key: key.to_string(),
                },
            );
            self.notify_key(key, None);
        }
    }

    /// Read a key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.data.read().get(key).cloned()
    }

    /// Snapshot of every entry under `prefix/`.
    pub fn entries_under(&self, prefix: &str) -> BTreeMap<String, String> {
        let want = format!("{prefix}/");
        self.inner
            .data
            .read()
            .iter()
            .filter(|(k, _)| k.starts_with(&want))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Make the next `count` PUTs to `path` fail.
    pub fn fail_puts(&self, path: &str, count: u32) {
        self.inner
            .put_failures
            .write()
            .insert(path.to_string(), count);
    }

    /// Total PUT attempts seen for `path`, including failed ones.
    pub fn put_attempts(&self, path: &str) -> u32 {
        self.inner
            .put_attempts
            .read()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Successful writes, in arrival order.
    pub fn ops(&self) -> Vec<KvOp> {
        self.inner.log.read().clone()
    }

    /// Terminate every key watch on `key` as if the remote stream died.
    pub fn close_key_watches(&self, key: &str) {
        self.inner.key_subs.write().retain(|sub| sub.key != key);
    }

    fn notify_prefix(&self, key: &str, change: PrefixChange) {
        let mut subs = self.inner.prefix_subs.write();
        subs.retain(|sub| {
            if !key.starts_with(&format!("{}/", sub.prefix)) {
                return true;
            }
            sub.tx.send(change.clone()).is_ok()
        });
    }

    fn notify_key(&self, key: &str, value: Option<String>) {
        let mut subs = self.inner.key_subs.write();
        subs.retain(|sub| {
            if sub.key != key {
                return true;
            }
            sub.tx.send(value.clone()).is_ok()
        });
    }

    /// Stop handle whose task unregisters the subscription, closing
    /// the subscriber's channel the way a remote watch teardown would.
    fn subscription_handle(
        &self,
        id: u64,
        from_prefixes: bool,
    ) -> WatchHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            // Either a stop signal or a dropped handle unregisters.
            let _ = stop_rx.changed().await;
            if from_prefixes {
                inner.prefix_subs.write().retain(|sub| sub.id != id);
            } else {
                inner.key_subs.write().retain(|sub| sub.id != id);
            }
        });
        WatchHandle::new(stop_tx, task)
    }
}

impl KvClient for MemoryKv {
    fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = TrellisResult<PrefixWatch>> + Send + '_>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();

            // Initial load: current entries surface as New, like a first
            // Consul listing round.
            let want = format!("{prefix}/");
            for (key, value) in self.inner.data.read().iter() {
                if key.starts_with(&want) {
                    let _ = tx.send(PrefixChange::New {
                        key: key.clone(),
                        value: value.clone(),
                    });
                }
            }

            let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed);
            self.inner
                .prefix_subs
                .write()
                .push(PrefixSub { id, prefix, tx });
            Ok(PrefixWatch {
                events: rx,
                handle: self.subscription_handle(id, true),
            })
        })
    }

    fn watch_key(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = TrellisResult<KeyWatch>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(self.inner.data.read().get(&key).cloned());

            let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed);
            self.inner.key_subs.write().push(KeySub { id, key, tx });
            Ok(KeyWatch {
                values: rx,
                handle: self.subscription_handle(id, false),
            })
        })
    }

    fn put(
        &self,
        path: &str,
        body: &str,
    ) -> Pin<Box<dyn Future<Output = TrellisResult<()>> + Send + '_>> {
        let path = path.to_string();
        let body = body.to_string();
        Box::pin(async move {
            *self
                .inner
                .put_attempts
                .write()
                .entry(path.clone())
                .or_insert(0) += 1;

            let mut failures = self.inner.put_failures.write();
            if let Some(remaining) = failures.get_mut(&path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TrellisError::kv(format!("injected put failure for {path}")));
                }
            }
            drop(failures);

            self.inner.log.write().push(KvOp::Put {
                path: path.clone(),
                body: body.clone(),
            });
            self.set(path, body);
            Ok(())
        })
    }

    fn delete(&self, path: &str) -> Pin<Box<dyn Future<Output = TrellisResult<()>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            self.inner.log.write().push(KvOp::Delete { path: path.clone() });
            self.remove(&path);
            Ok(())
        })
    }
}
