//! Forwarding HTTP proxy
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────── event loop (mio) ────────────────────────┐
//!     Client          │  ┌──────────┐   ┌───────────────┐   ┌────────────┐             │
//!     ────────────────┼─▶│ listener │──▶│ ClientHandler │──▶│ Connection │             │
//!                     │  └──────────┘   │ RequestParser │   │  Manager   │             │
//!                     │                 └───────┬───────┘   └─────┬──────┘             │
//!                     │              processed  │                 │ pooled / new       │
//!                     │                         ▼                 ▼                    │
//!     Client          │                 ┌───────────────┐   ┌─────────────┐            │
//!     ◀───────────────┼─────────────────│  write_buf    │◀──│ServerHandler│◀───────────┼──── Origin
//!                     │                 └───────────────┘   │ResponseParser            │
//!                     │                                     └─────────────┘            │
//!                     └──────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use forward_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use forward_proxy::observability::{init_logging, init_metrics};
use forward_proxy::{Proxy, ProxyError};

/// Forwarding HTTP/1.1 proxy with upstream connection pooling.
#[derive(Debug, Parser)]
#[command(name = "forward-proxy", version, about)]
struct Cli {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn resolve(&self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProxyConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("forward-proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.observability);
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Proxy failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: ProxyConfig) -> Result<(), ProxyError> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        pool_enabled = config.pool.enabled,
        pool_ttl_ms = config.pool.ttl_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut proxy = Proxy::bind(config)?;
    proxy.run()?;

    tracing::info!("Shutdown complete");
    Ok(())
}
