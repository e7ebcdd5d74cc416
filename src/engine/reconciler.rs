//! The reconciliation core.
//!
//! A single consumer applies each event against the in-memory state,
//! then diffs the materialized map before and after and pushes the
//! difference to the services prefix. Events are processed whole; the
//! only suspension points are the blocking first-value reads when a
//! role starts new watchers, PUT retries, DELETE attempts, and watcher
//! shutdown.

use crate::core::error::TrellisResult;
use crate::edn::Value;
use crate::engine::events::Event;
use crate::engine::expand::{self, find_watchers};
use crate::engine::state::{Coordinate, Node, Role, State};
use crate::engine::watchers::{self, Watcher};
use crate::kv::KvClient;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Single-threaded event consumer.
pub struct Reconciler {
    state: State,
    kv: Arc<dyn KvClient>,
    /// Sender cloned into watcher forward tasks.
    events_tx: mpsc::UnboundedSender<Event>,
    services_prefix: String,
    put_retry: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Reconciler {
    /// Create a reconciler over an empty state.
    pub fn new(
        kv: Arc<dyn KvClient>,
        events_tx: mpsc::UnboundedSender<Event>,
        services_prefix: String,
        put_retry: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            state: State::new(),
            kv,
            events_tx,
            services_prefix,
            put_retry,
            shutdown,
        }
    }

    /// Apply one event and push the resulting diff downstream.
    ///
    /// Returns an error only for fatal conditions (watcher EOF).
    pub async fn step(&mut self, event: Event) -> TrellisResult<()> {
        tracing::debug!(event = event.kind(), "applying event");
        let previous = match &event {
            // GetState never mutates; skip the clone and the diff.
            Event::GetState { .. } => None,
            _ => Some(self.state.vkv.clone()),
        };

        match event {
            Event::NodeNew { name, value } => self.apply_node_new(&name, &value),
            Event::NodeUpdated { name, value } => {
                self.apply_node_removed(&name);
                self.apply_node_new(&name, &value);
            }
            Event::NodeRemoved { name } => self.apply_node_removed(&name),
            Event::RoleNew { key, value } => self.apply_role_new(&key, &value).await?,
            Event::RoleUpdated { key, value } => {
                self.apply_role_removed(&key).await;
                self.apply_role_new(&key, &value).await?;
            }
            Event::RoleRemoved { key } => self.apply_role_removed(&key).await,
            Event::WatcherChanged { key, value } => self.apply_watcher_changed(&key, value),
            Event::WatcherEof { key } => {
                return Err(crate::core::error::TrellisError::WatcherEof { key });
            }
            Event::GetState { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
        }

        if let Some(previous) = previous {
            self.flush(previous).await;
        }
        Ok(())
    }

    /// Stop every watcher. Called once ingestion has drained.
    pub async fn shutdown(&mut self) {
        let watchers = std::mem::take(&mut self.state.watchers);
        for (_, watcher) in watchers {
            watcher.stop().await;
        }
    }

    fn apply_node_new(&mut self, name: &str, raw: &str) {
        let node = match Node::parse(name, raw) {
            Ok(node) => node,
            Err(e) => {
                tracing::error!(node = %name, error = %e, "ignoring malformed node record");
                return;
            }
        };

        let matched: Vec<String> = self
            .state
            .roles
            .values()
            .filter(|role| role.matcher.eval(&node.tags))
            .map(|role| role.key.clone())
            .collect();
        for role_key in &matched {
            if let Some(role) = self.state.roles.get_mut(role_key) {
                role.nodes.push(node.name.clone());
            }
        }
        self.state.nodes.insert(node.name.clone(), node);

        let node = &self.state.nodes[name];
        for role_key in &matched {
            if let Some(role) = self.state.roles.get(role_key) {
                render_role(&mut self.state.vkv, &self.state.watchers, node, role);
            }
        }
    }

    fn apply_node_removed(&mut self, name: &str) {
        if self.state.nodes.remove(name).is_none() {
            tracing::debug!(node = %name, "removal for unknown node");
        }
        for role in self.state.roles.values_mut() {
            role.nodes.retain(|node| node != name);
        }
        self.state.vkv.retain(|coordinate, _| coordinate.node != name);
    }

    async fn apply_role_new(&mut self, key: &str, raw: &str) -> TrellisResult<()> {
        let mut role = match Role::parse(key, raw) {
            Ok(role) => role,
            Err(e) => {
                tracing::error!(role = %key, error = %e, "dropping role");
                return Ok(());
            }
        };

        // Every referenced watcher must hold a concrete value before
        // any document is materialized. One occurrence per role in the
        // multiset, however many times the role references the key.
        let mut watcher_keys: Vec<String> = Vec::new();
        for (_, template) in &role.services {
            for watcher_key in find_watchers(template) {
                if !watcher_keys.contains(&watcher_key) {
                    watcher_keys.push(watcher_key);
                }
            }
        }
        watchers::incref(
            &mut self.state.watchers,
            &self.kv,
            &self.events_tx,
            key,
            &watcher_keys,
        )
        .await?;

        role.nodes = self
            .state
            .nodes
            .values()
            .filter(|node| role.matcher.eval(&node.tags))
            .map(|node| node.name.clone())
            .collect();

        for node_name in &role.nodes {
            if let Some(node) = self.state.nodes.get(node_name) {
                render_role(&mut self.state.vkv, &self.state.watchers, node, &role);
            }
        }
        self.state.roles.insert(key.to_string(), role);
        Ok(())
    }

    async fn apply_role_removed(&mut self, key: &str) {
        let Some(role) = self.state.roles.remove(key) else {
            tracing::debug!(role = %key, "removal for unknown role");
            return;
        };
        for node in &role.nodes {
            for (service, _) in &role.services {
                self.state
                    .vkv
                    .remove(&Coordinate::new(node.clone(), service.clone()));
            }
        }
        watchers::decref(&mut self.state.watchers, key).await;
    }

    fn apply_watcher_changed(&mut self, key: &str, value: Value) {
        let role_keys = match self.state.watchers.get_mut(key) {
            Some(watcher) => {
                watcher.value = value;
                let mut roles = watcher.roles.clone();
                roles.sort();
                roles.dedup();
                roles
            }
            None => {
                // A value raced in after the last reference was dropped.
                tracing::debug!(key = %key, "value update for unreferenced watcher");
                return;
            }
        };

        for role_key in role_keys {
            let Some(role) = self.state.roles.get(&role_key) else {
                continue;
            };
            for node_name in &role.nodes {
                if let Some(node) = self.state.nodes.get(node_name) {
                    render_role(&mut self.state.vkv, &self.state.watchers, node, role);
                }
            }
        }
    }

    /// Push the VKV diff to the services prefix.
    ///
    /// New or changed documents are PUT with unbounded retry; this is
    /// the engine's sole source of backpressure. Deletions are
    /// attempted once and logged on failure — a stale entry is not
    /// safety-critical and a later reconciliation re-issues it.
    async fn flush(&self, previous: BTreeMap<Coordinate, String>) {
        for (coordinate, document) in &self.state.vkv {
            if previous.get(coordinate) != Some(document) {
                self.put_with_retry(coordinate, document).await;
            }
        }
        for coordinate in previous.keys() {
            if !self.state.vkv.contains_key(coordinate) {
                let path = self.service_path(coordinate);
                if let Err(e) = self.kv.delete(&path).await {
                    tracing::error!(path = %path, error = %e, "delete failed; leaving for a later reconciliation");
                }
            }
        }
    }

    async fn put_with_retry(&self, coordinate: &Coordinate, document: &str) {
        let path = self.service_path(coordinate);
        let mut shutdown = self.shutdown.clone();
        loop {
            match self.kv.put(&path, document).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        path = %path,
                        error = %e,
                        retry_in = ?self.put_retry,
                        "put failed; retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.put_retry) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                tracing::warn!(path = %path, "abandoning put retry on shutdown");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    fn service_path(&self, coordinate: &Coordinate) -> String {
        format!(
            "{}/{}/{}",
            self.services_prefix, coordinate.node, coordinate.service
        )
    }
}

/// Render every service a role declares for one node into the VKV.
///
/// A rendering that fails validation keeps whatever the coordinate
/// held before (last known-good), logged per (node, service).
fn render_role(
    vkv: &mut BTreeMap<Coordinate, String>,
    watchers: &BTreeMap<String, Watcher>,
    node: &Node,
    role: &Role,
) {
    for (service, template) in &role.services {
        match expand::render(template, watchers, node) {
            Ok(document) => {
                vkv.insert(Coordinate::new(node.name.clone(), service.clone()), document);
            }
            Err(e) => tracing::warn!(
                node = %node.name,
                service = %service,
                error = %e,
                "document rejected; keeping last known-good entry"
            ),
        }
    }
}
