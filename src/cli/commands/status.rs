//! Status command implementation.
//!
//! Fetches `/state` from a running instance's query endpoint and
//! renders it for the operator.

use crate::engine::state::StateSnapshot;
use anyhow::{Context, Result};
use clap::Args;

/// Show the state of a running instance.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Query endpoint URL.
    #[arg(short, long, default_value = "http://127.0.0.1:7300")]
    pub endpoint: String,

    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Run the status command.
pub async fn run_status(args: StatusArgs) -> Result<()> {
    let url = format!("{}/state", args.endpoint.trim_end_matches('/'));
    let snapshot: StateSnapshot = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {url}"))?
        .error_for_status()
        .context("query endpoint returned an error")?
        .json()
        .await
        .context("query endpoint returned malformed state")?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        _ => show_status_text(&snapshot),
    }
    Ok(())
}

fn show_status_text(snapshot: &StateSnapshot) {
    println!("Trellis State");
    println!("=============");
    println!();

    println!("Roles ({}):", snapshot.roles.len());
    for role in &snapshot.roles {
        println!(
            "  {:<20} nodes: [{}]  services: [{}]",
            role.key,
            role.nodes.join(", "),
            role.services.join(", ")
        );
    }
    println!();

    println!("Nodes ({}):", snapshot.nodes.len());
    for node in &snapshot.nodes {
        println!(
            "  {:<20} ip: {:<15} roles: [{}]",
            node.name,
            node.ip,
            node.roles.join(", ")
        );
    }
    println!();

    println!("Watchers ({}):", snapshot.watchers.len());
    for watcher in &snapshot.watchers {
        println!(
            "  {:<20} refs: {:<3} value: {}",
            watcher.key,
            watcher.roles.len(),
            watcher.watcher_value
        );
    }
}
