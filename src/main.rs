//! Reverse-proxy load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                  LOAD BALANCER                   │
//!                      │                                                  │
//!     Client Request   │  ┌─────────┐    ┌──────────┐    ┌────────────┐   │
//!     ─────────────────┼─▶│  http   │───▶│ dispatch │───▶│    pool    │   │
//!                      │  │ server  │    │  + retry │    │ + scheduler│   │
//!                      │  └─────────┘    └────┬─────┘    └─────▲──────┘   │
//!                      │                      │ pre-flight     │ set_dead │
//!                      │                      ▼                │          │
//!     Client Response  │  ┌─────────┐    ┌──────────┐    ┌─────┴──────┐   │
//!     ◀────────────────┼──│  http   │◀───│transport │    │  liveness  │   │
//!                      │  │ server  │    │          │    │  monitor   │   │
//!                      │  └─────────┘    └────┬─────┘    └────────────┘   │
//!                      └───────────────────────┼──────────────────────────┘
//!                                              ▼
//!                                           Backends
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use lb_proxy::config::loader::load_config;
use lb_proxy::config::watcher::ConfigWatcher;
use lb_proxy::lifecycle::signals::spawn_signal_handler;
use lb_proxy::observability::{logging, metrics};
use lb_proxy::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "lb-proxy", about = "Reverse-proxy load balancer", version)]
struct Cli {
    /// Path to the configuration file (JSON or TOML).
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Reload the backend list when the configuration file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    logging::init_logging(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "lb-proxy starting");
    tracing::info!(
        config = ?cli.config,
        bind_address = %config.listener.bind_address(),
        strategy = config.strategy.name(),
        backends = config.backends.len(),
        max_connections = config.listener.max_connections,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(config.listener.bind_address()).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    // Keep the watcher alive for the lifetime of the server.
    let (_watcher, config_updates) = if cli.watch {
        let (watcher, updates) = ConfigWatcher::new(&cli.config, &config);
        (Some(watcher.run()?), updates)
    } else {
        let (_, updates) = mpsc::unbounded_channel();
        (None, updates)
    };

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
