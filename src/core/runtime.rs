//! Runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: KV client → engine (prefix watches + reconciler) → query listener
//! - Shutdown order: signal → engine drains and stops watchers → query listener

use crate::core::config::Config;
use crate::engine::Engine;
use crate::kv::consul::ConsulKv;
use crate::kv::KvClient;
use crate::query;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long shutdown waits for the query listener to wind down.
const QUERY_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Trellis runtime holding component handles.
pub struct Runtime {
    config: Config,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run against the configured Consul agent until SIGINT or a
    /// fatal engine error.
    pub async fn run(&mut self) -> Result<()> {
        let kv: Arc<dyn KvClient> = Arc::new(
            ConsulKv::new(
                self.config.consul.endpoint.clone(),
                self.config.consul.token.clone(),
                self.config.watch_wait(),
            )
            .context("failed to build consul client")?,
        );
        self.run_with_kv(kv).await
    }

    /// Run against an arbitrary KV client (embedded mode, tests).
    pub async fn run_with_kv(&mut self, kv: Arc<dyn KvClient>) -> Result<()> {
        tracing::info!(
            endpoint = %self.config.consul.endpoint,
            "starting Trellis runtime"
        );

        let engine = Engine::new(
            kv,
            self.config.prefixes.clone(),
            self.config.put_retry(),
        );

        let query_task = self.start_query_listener(&engine);
        let mut engine_task = tokio::spawn(engine.run(self.shutdown_rx.clone()));

        let engine_result = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
                let _ = self.shutdown_tx.send(true);
                engine_task.await
            }
            result = &mut engine_task => {
                // The engine only returns on its own for a fatal error
                // or because every producer vanished; either way, wind
                // down the rest.
                let _ = self.shutdown_tx.send(true);
                result
            }
        };

        self.stop_query_listener(query_task).await;

        match engine_result {
            Ok(result) => result.context("engine terminated")?,
            Err(e) => tracing::error!(error = %e, "engine task panicked"),
        }
        tracing::info!("Trellis runtime stopped");
        Ok(())
    }

    /// Start the query listener if one is configured.
    fn start_query_listener(&self, engine: &Engine) -> Option<JoinHandle<()>> {
        let bind = self.config.query_bind()?;
        let handle = engine.handle();
        let shutdown_rx = self.shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = query::serve(bind, handle, shutdown_rx).await {
                tracing::error!(error = %e, "query endpoint failed");
            }
        }))
    }

    /// Stop the query listener, bounded by a timeout.
    async fn stop_query_listener(&self, task: Option<JoinHandle<()>>) {
        let Some(task) = task else { return };
        match tokio::time::timeout(QUERY_STOP_TIMEOUT, task).await {
            Ok(Ok(())) => tracing::debug!("query endpoint stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "query endpoint task panicked"),
            Err(_) => tracing::warn!("query endpoint stop timed out"),
        }
    }
}
