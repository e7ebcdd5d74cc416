//! Trellis - unified CLI entrypoint.
//!
//! Usage:
//!   trellis start --config config/trellis.toml
//!   trellis status [--endpoint URL] [--format text|json]
//!   trellis config validate --config config/trellis.toml

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use trellis::cli::commands::{run_config, run_start, run_status};
use trellis::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/trellis.toml"));

    match cli.command {
        Commands::Start(_args) => run_start(&config_path).await,
        Commands::Status(args) => run_status(args).await,
        Commands::Config(args) => run_config(args, &config_path),
    }
}
