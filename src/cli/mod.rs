//! CLI argument definitions.

use clap::{Parser, Subcommand};

pub mod commands;

/// Trellis command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "trellis",
    version,
    about = "Role-based service materializer over a Consul-style KV store"
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the materializer.
    Start(commands::start::StartArgs),

    /// Show the state of a running instance.
    Status(commands::status::StatusArgs),

    /// Configuration helpers.
    Config(commands::config::ConfigArgs),
}
