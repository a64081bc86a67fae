//! Operator helper for meshgate.
//!
//! `ports` lists serial devices and whether auto-detection would consider
//! them a radio. `check` validates a config file and prints the link the
//! daemon would open.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use meshgate::config::Config;
use meshgate::selector::TransportSelector;
use meshgate::tracing;

#[derive(Parser)]
#[command(name = "meshgate-cli", version, about = "Inspect meshgate radio links")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports and the auto-detect verdict for each
    Ports,
    /// Validate a config file and show the resolved link
    Check {
        config: PathBuf,
    },
}

fn ports() {
    let selector = TransportSelector::new();
    let survey = selector.survey();
    if survey.is_empty() {
        println!("No serial ports found.");
        return;
    }
    for (port, is_radio) in survey {
        let usb = port
            .usb_id
            .map(|(vid, pid)| format!("{vid:04x}:{pid:04x}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<32} {:<10} {:<24} {}",
            port.path,
            usb,
            port.product.as_deref().unwrap_or("-"),
            if is_radio { "radio" } else { "" }
        );
    }
    if let Some(chosen) = selector.detect() {
        println!("\nAuto-detect would use {chosen}");
    }
}

fn check(path: PathBuf) -> Result<()> {
    let config = Config::load_from(&path).with_context(|| format!("loading {}", path.display()))?;
    let resolved = TransportSelector::new()
        .resolve(&config.gateway)
        .context("invalid gateway settings")?;
    println!("transport: {}", resolved.descriptor);
    println!("bitrate:   {} bit/s", resolved.bitrate);
    println!(
        "reconnect: {}ms..{}ms, {} attempts per cycle, health check every {}s",
        config.reconnect.initial_delay_ms,
        config.reconnect.max_delay_ms,
        config.reconnect.backoff_policy().max_attempts_per_cycle,
        config.reconnect.health_interval().as_secs()
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing::init_cli();
    match Cli::parse().command {
        Command::Ports => ports(),
        Command::Check { config } => check(config)?,
    }
    Ok(())
}
