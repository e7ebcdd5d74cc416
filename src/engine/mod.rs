//! The materialization engine.
//!
//! Wires the event sources together: two prefix watches (nodes,
//! roles) and the watcher registry feed one merged stream that the
//! reconciler consumes strictly sequentially. The query endpoint
//! injects `GetState` events through an [`EngineHandle`].
//!
//! Shutdown closes the prefix watches, drains whatever the merged
//! stream still holds, then stops every watcher.

pub mod events;
pub mod expand;
pub mod reconciler;
pub mod state;
pub mod watchers;

use crate::core::config::PrefixesConfig;
use crate::core::error::TrellisResult;
use crate::engine::events::Event;
use crate::engine::reconciler::Reconciler;
use crate::engine::state::StateSnapshot;
use crate::kv::{KvClient, PrefixChange};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Handle for injecting events from outside the engine.
#[derive(Clone)]
pub struct EngineHandle {
    events: mpsc::UnboundedSender<Event>,
}

impl EngineHandle {
    /// Request a state snapshot, ordered with respect to every other
    /// event. Returns `None` once the engine has stopped.
    pub async fn snapshot(&self) -> Option<StateSnapshot> {
        let (reply, response) = oneshot::channel();
        self.events.send(Event::GetState { reply }).ok()?;
        response.await.ok()
    }
}

/// The assembled engine, ready to run.
pub struct Engine {
    kv: Arc<dyn KvClient>,
    prefixes: PrefixesConfig,
    put_retry: Duration,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl Engine {
    /// Create an engine over the given store.
    pub fn new(kv: Arc<dyn KvClient>, prefixes: PrefixesConfig, put_retry: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            kv,
            prefixes,
            put_retry,
            events_tx,
            events_rx,
        }
    }

    /// Handle for query injection. Valid for the engine's lifetime.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Run until shutdown or a fatal error.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> TrellisResult<()> {
        let Engine {
            kv,
            prefixes,
            put_retry,
            events_tx,
            mut events_rx,
        } = self;

        let node_watch = kv.watch_prefix(&prefixes.nodes).await?;
        let role_watch = kv.watch_prefix(&prefixes.roles).await?;
        let node_pump = tokio::spawn(pump(node_watch.events, events_tx.clone(), Event::node_change));
        let role_pump = tokio::spawn(pump(role_watch.events, events_tx.clone(), Event::role_change));
        tracing::info!(
            nodes = %prefixes.nodes,
            roles = %prefixes.roles,
            services = %prefixes.services,
            "engine started"
        );

        let mut reconciler = Reconciler::new(
            kv,
            events_tx,
            prefixes.services.clone(),
            put_retry,
            shutdown.clone(),
        );

        let mut outcome: TrellisResult<()> = Ok(());
        loop {
            tokio::select! {
                maybe = events_rx.recv() => match maybe {
                    Some(event) => {
                        if let Err(e) = reconciler.step(event).await {
                            outcome = Err(e);
                            break;
                        }
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Stop ingestion, then drain what the merged stream already
        // holds so the final diff reflects every observed change.
        node_watch.handle.stop().await;
        role_watch.handle.stop().await;
        let _ = node_pump.await;
        let _ = role_pump.await;
        if outcome.is_ok() {
            while let Ok(event) = events_rx.try_recv() {
                if let Err(e) = reconciler.step(event).await {
                    outcome = Err(e);
                    break;
                }
            }
        }

        reconciler.shutdown().await;
        match &outcome {
            Ok(()) => tracing::info!("engine stopped"),
            Err(e) => tracing::error!(error = %e, "engine terminated"),
        }
        outcome
    }
}

/// Forward prefix changes into the merged stream.
async fn pump(
    mut changes: mpsc::UnboundedReceiver<PrefixChange>,
    events: mpsc::UnboundedSender<Event>,
    map: fn(PrefixChange) -> Event,
) {
    while let Some(change) = changes.recv().await {
        if events.send(map(change)).is_err() {
            break;
        }
    }
}
