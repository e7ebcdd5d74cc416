//! Config command implementation.

use crate::core::config::Config;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::Path;

/// Configuration helpers.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Parse and validate the configuration file.
    Validate,
}

/// Run the config command.
pub fn run_config(args: ConfigArgs, config_path: &Path) -> Result<()> {
    match args.command {
        ConfigCommands::Validate => {
            let config = Config::from_file(config_path)?;
            config.validate()?;
            println!("Configuration OK: {}", config_path.display());
            println!("  consul endpoint:  {}", config.consul.endpoint);
            println!("  nodes prefix:     {}", config.prefixes.nodes);
            println!("  roles prefix:     {}", config.prefixes.roles);
            println!("  services prefix:  {}", config.prefixes.services);
            match &config.query.bind {
                Some(bind) => println!("  query endpoint:   {bind}"),
                None => println!("  query endpoint:   disabled"),
            }
            Ok(())
        }
    }
}
