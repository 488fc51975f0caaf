//! microgate: embeddable HTTP gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server (request id, body limit, buffering)
//!                         │
//!                         ▼
//!                     http::dispatch ──▶ routing (masks, trie, rewrites)
//!                         │
//!        ┌────────────────┼──────────────────────┐
//!        ▼                ▼                      ▼
//!   static_files    registry handlers      proxy::forward ──▶ upstream
//!        │                │                      │
//!        └────────────────┴──────────┬───────────┘
//!                                    ▼
//!     Client Response ◀──────── http::headers + http::response
//!
//!     Cross-cutting: config (load, validate, watch) · observability · lifecycle
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use microgate::config::loader::load_config;
use microgate::config::watcher::ConfigWatcher;
use microgate::http::HttpServer;
use microgate::lifecycle::Shutdown;
use microgate::net::load_tls_config;
use microgate::observability::{logging, metrics};
use microgate::registry::RegistryBuilder;

#[derive(Parser)]
#[command(name = "microgate")]
#[command(about = "Mask-routed HTTP gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "microgate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    logging::init_logging(&config.observability);

    tracing::info!(
        config = %args.config.display(),
        bind_address = %config.listener.bind_address,
        host_servers = config.host_servers.len(),
        tls = config.listener.tls.is_some(),
        "microgate v0.1.0 starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = RegistryBuilder::with_builtins().build();
    let tls = config.listener.tls.clone();
    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config, registry)?;

    let (watcher, config_updates) = ConfigWatcher::new(&args.config);
    let _watch_handle = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };

    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    shutdown.trigger_on_signal();

    match tls {
        Some(tls) => {
            let addr: SocketAddr = bind_address.parse()?;
            let rustls = load_tls_config(&tls).await?;
            server.run_tls(addr, rustls, config_updates, stop).await?;
        }
        None => {
            let listener = TcpListener::bind(&bind_address).await?;
            server.run(listener, config_updates, stop).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
