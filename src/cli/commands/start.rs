//! Start command implementation.

use crate::core::config::Config;
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the materializer.
#[derive(Args, Debug)]
pub struct StartArgs {
    // No additional arguments - config is handled globally
}

/// Initialize the tracing subscriber.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Run the start command with the given config path.
pub async fn run_start(config_path: &Path) -> Result<()> {
    init_tracing();

    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
