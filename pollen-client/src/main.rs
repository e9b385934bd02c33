// SPDX-License-Identifier: MIT
//
// Pollen: Network Entropy Exchange
// Copyright (c) 2025 Pollen Contributors

//! Pollen Client - seeds the local entropy pool from a Pollen server
//!
//! Sends a fresh random challenge, verifies the server's challenge response when the server
//! answers in challenge-digest framing, and writes the returned entropy into the local pool
//! device. Runs once by default, or repeatedly with `--interval`.
//!
//! ```text
//! ┌──────────────┐   challenge, tag   ┌──────────────┐   seed    ┌──────────────┐
//! │    Client    │ ──────────────────>│    Server    │           │  Local pool  │
//! │              │ <──────────────────│              │           │ /dev/urandom │
//! └──────────────┘  H(challenge),seed └──────────────┘           └──────────────┘
//!        │                                                              ^
//!        └──────────────────────────────────────────────────────────────┘
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use pollen_core::{client::ExchangeClient, config::ClientConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "pollen-client")]
#[command(about = "Pollen Client - Fetches entropy from a Pollen server", long_about = None)]
struct Args {
    /// Server URL (e.g. https://entropy.example.net/)
    url: Option<String>,

    /// Entropy pool device to write into
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Skip TLS certificate verification (the server is NOT authenticated)
    #[arg(long, default_value = "false")]
    insecure: bool,

    /// Seconds between exchanges (0 = run once)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Correlation tag sent with each request
    #[arg(short, long)]
    tag: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Load configuration from environment variables; flags still override
    #[arg(long, default_value = "false")]
    env_mode: bool,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig> {
        let mut config = if self.env_mode {
            info!("Loading configuration from environment variables");
            ClientConfig::from_env().context("Failed to load configuration from environment")?
        } else {
            let url = self
                .url
                .clone()
                .context("A server URL is required unless --env-mode is set")?;
            ClientConfig::new(url)
        };

        if let Some(url) = self.url {
            config.server_url = url;
        }
        if let Some(device) = self.device {
            config.device_path = device;
        }
        if self.insecure {
            config.insecure_skip_verify = true;
        }
        if let Some(secs) = self.interval {
            config.interval_secs = secs;
        }
        if self.tag.is_some() {
            config.tag = self.tag;
        }

        config.validate().context("Invalid client configuration")?;
        Ok(config)
    }
}

/// Repeat exchanges until a shutdown signal arrives
async fn run_loop(client: &ExchangeClient, period: Duration) {
    let mut ticker = interval(period);
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Failures are reported and the next tick tries again
                if let Err(e) = client.run_once().await {
                    error!("Exchange failed: {}", e);
                }
            }
            _ = &mut shutdown => break,
        }
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use futures::stream::StreamExt;
        use signal_hook::consts::signal::*;
        use signal_hook_tokio::Signals;

        match Signals::new([SIGINT, SIGTERM]) {
            Ok(mut signals) => {
                if let Some(signal) = signals.next().await {
                    info!("Received signal: {:?}", signal);
                }
                return;
            }
            Err(e) => warn!("Failed to register signal handlers: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C signal");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Pollen Client v{}", env!("CARGO_PKG_VERSION"));

    let config = args.into_config()?;
    info!("Server: {}", config.server_url);
    info!("Pool device: {}", config.device_path.display());

    let client = ExchangeClient::new(config).context("Failed to create exchange client")?;

    match client.config().interval() {
        None => {
            let written = client.run_once().await.context("Exchange failed")?;
            info!("Seeded local pool with {} bytes", written);
        }
        Some(period) => {
            info!("Exchange interval: {:?}", period);
            run_loop(&client, period).await;
            info!("Client shut down gracefully");
        }
    }

    Ok(())
}
