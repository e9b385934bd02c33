// SPDX-License-Identifier: MIT
//
// Pollen: Network Entropy Exchange
// Copyright (c) 2025 Pollen Contributors

//! Pollen Server - Entropy-as-a-Service endpoint
//!
//! Draws fresh randomness per request, binds it to the client's challenge and tag through a
//! SHA-512 hash chain, feeds the intermediate digests back into the local entropy pool, and
//! answers with the configured framing.
//!
//! Plain HTTP by default; `--tls` (or `tls_enabled`) serves HTTPS with the configured PEM
//! certificate and key, `/etc/pollen/cert.pem` and `/etc/pollen/key.pem` unless overridden.

use anyhow::{Context, Result};
use clap::Parser;
use pollen_core::{
    config::ServerConfig, handler::ProtocolHandler, sink::DeviceSink, source::RandomSource,
};
use pollen_server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pollen-server")]
#[command(about = "Pollen Server - Serves and exchanges entropy over HTTP", long_about = None)]
struct Args {
    /// Listen port (overrides the port of the configured listen address)
    port: Option<u16>,

    /// Path to configuration file (ignored if --env-mode is set)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Load configuration from environment variables instead of file
    #[arg(long, default_value = "false")]
    env_mode: bool,

    /// Serve HTTPS using the configured certificate and key
    #[arg(long, default_value = "false")]
    tls: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args.log_level.parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Pollen Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.env_mode {
        info!("Loading configuration from environment variables");
        ServerConfig::from_env()
            .context("Failed to load configuration from environment")?
    } else if let Some(path) = &args.config {
        info!("Loading configuration from file: {:?}", path);
        ServerConfig::from_file(path)
            .context("Failed to load configuration from file")?
    } else {
        ServerConfig::default()
    };

    let mut config = match args.port {
        Some(port) => config.with_port(port).context("Invalid listen port")?,
        None => config,
    };
    if args.tls {
        config.tls_enabled = true;
        config.validate().context("Invalid TLS configuration")?;
    }

    info!("Response mode: {:?}", config.response_mode);
    info!("Draw size: {} bytes", config.draw_size);
    info!("Pool device: {}", config.device_path.display());

    // Entropy source and pool feedback writer
    let source = RandomSource::from_config(&config)
        .context("Failed to open entropy source")?;
    info!("Entropy source: {}", source.backend_name());

    let (sink, _writer) = DeviceSink::spawn(&config.device_path, config.feedback_queue_depth);
    let feedback = sink.shared_stats();

    let handler = ProtocolHandler::from_config(&config, source, Arc::new(sink));
    let state = AppState::new(handler, Some(feedback))
        .with_metrics_enabled(config.metrics_enabled);

    let app = pollen_server::router(state, config.request_timeout());

    // Parse listen address
    let addr = config.listen_addr().context("Invalid listen address")?;

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    };

    // Start server
    if config.tls_enabled {
        let tls = pollen_server::load_tls(&config)
            .await
            .context("Failed to load TLS certificate and key")?;
        info!("Starting HTTPS server on {}", addr);
        pollen_server::serve_tls(addr, app, tls, shutdown).await?;
    } else {
        info!("Starting server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        pollen_server::serve(listener, app, shutdown).await?;
    }

    info!("Server shut down gracefully");
    Ok(())
}
