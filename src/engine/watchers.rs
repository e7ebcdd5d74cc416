//! Reference-counted watcher registry.
//!
//! A watcher is a live subscription to one remote KV key whose value
//! is substituted into service templates. Watchers are shared across
//! roles: the first reference starts the remote watch (blocking until
//! the first value arrives, so a role never materializes documents
//! from a value it has not seen), later references only extend the
//! role multiset, and dropping the last reference stops the watch.

use crate::core::error::{TrellisError, TrellisResult};
use crate::edn::{self, Value};
use crate::engine::events::Event;
use crate::kv::{KvClient, WatchHandle};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A live watcher.
pub struct Watcher {
    /// Watched KV key.
    pub key: String,
    /// Most recently seen value; `nil` until the first fetch parses.
    pub value: Value,
    /// Multiset of role keys referencing this watcher. Each installed
    /// role contributes exactly one occurrence.
    pub roles: Vec<String>,
    handle: WatcherHandle,
}

struct WatcherHandle {
    stop: watch::Sender<bool>,
    forward: JoinHandle<()>,
    kv: WatchHandle,
}

impl Watcher {
    /// Stop the watcher and wait for its tasks to finish.
    ///
    /// The forwarding task must stop before the KV watch: if the KV
    /// side dropped first, the forwarder would observe end-of-stream
    /// and report a spurious fatal EOF.
    pub async fn stop(self) {
        let WatcherHandle { stop, forward, kv } = self.handle;
        let _ = stop.send(true);
        let _ = forward.await;
        kv.stop().await;
    }
}

/// Parse a raw watch payload, falling back to `nil` on bad syntax.
fn parse_value(key: &str, raw: Option<String>) -> Value {
    match raw {
        None => Value::Nil,
        Some(text) => match edn::parse(&text) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "watcher value failed to parse; storing nil");
                Value::Nil
            }
        },
    }
}

/// Add one reference from `role_key` to each watcher in `keys`.
///
/// Unknown keys start a new remote watch; the call does not return
/// until every new watcher has a concrete first value.
pub async fn incref(
    watchers: &mut BTreeMap<String, Watcher>,
    kv: &Arc<dyn KvClient>,
    events: &mpsc::UnboundedSender<Event>,
    role_key: &str,
    keys: &[String],
) -> TrellisResult<()> {
    for key in keys {
        if let Some(watcher) = watchers.get_mut(key) {
            watcher.roles.push(role_key.to_string());
            continue;
        }

        tracing::info!(key = %key, role = %role_key, "starting watcher");
        let mut key_watch = kv.watch_key(key).await?;
        let first = key_watch
            .values
            .recv()
            .await
            .ok_or_else(|| TrellisError::WatcherEof { key: key.clone() })?;
        let value = parse_value(key, first);

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let events = events.clone();
        let forwarded_key = key.clone();
        let mut values = key_watch.values;
        let forward = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    maybe = values.recv() => match maybe {
                        Some(raw) => {
                            let value = parse_value(&forwarded_key, raw);
                            let update = Event::WatcherChanged {
                                key: forwarded_key.clone(),
                                value,
                            };
                            if events.send(update).is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = events.send(Event::WatcherEof {
                                key: forwarded_key.clone(),
                            });
                            break;
                        }
                    },
                }
            }
        });

        watchers.insert(
            key.clone(),
            Watcher {
                key: key.clone(),
                value,
                roles: vec![role_key.to_string()],
                handle: WatcherHandle {
                    stop: stop_tx,
                    forward,
                    kv: key_watch.handle,
                },
            },
        );
    }
    Ok(())
}

/// Remove one occurrence of `role_key` from every watcher, stopping
/// watchers whose multiset drains to empty.
pub async fn decref(watchers: &mut BTreeMap<String, Watcher>, role_key: &str) {
    let mut drained = Vec::new();
    for (key, watcher) in watchers.iter_mut() {
        if let Some(position) = watcher.roles.iter().position(|role| role == role_key) {
            watcher.roles.remove(position);
        }
        if watcher.roles.is_empty() {
            drained.push(key.clone());
        }
    }
    for key in drained {
        if let Some(watcher) = watchers.remove(&key) {
            tracing::info!(key = %watcher.key, "stopping unreferenced watcher");
            watcher.stop().await;
        }
    }
}
