//! Gateway daemon.
//!
//! Loads the config named on the command line or by `MESHGATE_CONFIG`
//! (defaults otherwise), brings up the radio interface and runs until SIGINT
//! or SIGTERM. With no overlay host attached, inbound payloads are logged.

use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use tokio::signal::unix::{self, SignalKind};

use meshgate::config::{Config, CONFIG_ENV};
use meshgate::tracing::{self, prelude::*};
use meshgate::{HostInterface, Ingress, MeshInterface};

struct LogIngress;

impl Ingress for LogIngress {
    fn inbound(&self, payload: &[u8]) {
        debug!(len = payload.len(), payload = %hex::encode(payload), "Inbound payload.");
    }
}

fn load_config() -> Result<Config> {
    let path = env::args().nth(1).or_else(|| env::var(CONFIG_ENV).ok());
    match path {
        Some(path) => {
            info!(path = %path, "Loading config.");
            Config::load_from(&path).with_context(|| format!("loading {path}"))
        }
        None => {
            info!("No config file given, using defaults.");
            Ok(Config::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let config = load_config()?;
    let iface = MeshInterface::builder(config)
        .ingress(Arc::new(LogIngress))
        .start()
        .context("starting interface")?;
    info!(transport = iface.transport(), "Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }

    trace!("Shutting down.");
    iface.detach().await;
    info!(metrics = %serde_json::to_string(&iface.metrics())?, "Exiting.");
    Ok(())
}
