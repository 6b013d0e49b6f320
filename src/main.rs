//! Secondary-site reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ http::upstream
//!                                         │  routing::normalize
//!                                         │  forwarding::decider ◀── PolicyStore ◀── Poller ◀── backend policy endpoint
//!                                         ▼
//!                          ┌──────────────┴──────────────┐
//!                       Forward                        Local
//!                   http::forward                 routing::table
//!                   (primary site)             (health, 404, backend)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use upstream_proxy::config::{self, ProxyConfig};
use upstream_proxy::lifecycle::{spawn_signal_handler, Shutdown};
use upstream_proxy::observability::{logging, metrics};
use upstream_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "upstream-proxy")]
#[command(about = "Reverse proxy with live forwarding to a primary site", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Force live forwarding on.
    #[arg(long, conflicts_with = "no_forwarding")]
    forwarding: bool,

    /// Force live forwarding off.
    #[arg(long)]
    no_forwarding: bool,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => ProxyConfig::default(),
    };
    if args.forwarding {
        config.forwarding.enabled = true;
    }
    if args.no_forwarding {
        config.forwarding.enabled = false;
    }
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!("upstream-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = %config.backend.url,
        forwarding_enabled = config.forwarding.enabled,
        routes = config.routes.len(),
        request_timeout_secs = config.timeouts.request_secs,
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

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config)?;
    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
