//! Lodge server binary.
//!
//! Serves the built-in demo application.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                        LODGE                          │
//!                 │                                                       │
//!   TCP client    │  ┌──────────┐   ┌──────────┐   ┌────────┐            │
//!  ───────────────┼─▶│ listener │──▶│ session  │──▶│ codec  │            │
//!                 │  │ acceptor │   │ (per     │   └───┬────┘            │
//!                 │  └──────────┘   │  conn)   │       ▼                 │
//!                 │                 │          │   ┌────────┐  scope     │   ┌─────────────┐
//!                 │                 │          │──▶│ bridge │──inbox────┼──▶│ application │
//!  ◀──────────────┼─────────────────│          │◀──│        │◀─outbox───┼───│             │
//!                 │                 └──────────┘   └────────┘            │   └─────────────┘
//!                 │                                                       │          ▲
//!                 │  ┌───────────┐   ┌──────────┐   ┌────────────────┐   │          │
//!                 │  │ signals   │──▶│ shutdown │──▶│ lifespan       │───┼──────────┘
//!                 │  └───────────┘   └──────────┘   └────────────────┘   │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use lodge::config::{self, ServerConfig};
use lodge::demo::DemoApp;
use lodge::observability::{logging, metrics};
use lodge::Server;

#[derive(Parser)]
#[command(name = "lodge")]
#[command(about = "HTTP/1.1 server for scope/receive/send applications", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to bind, overrides the config file.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overrides the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error), overrides the config file.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig, String> {
        let mut config = match &self.config {
            Some(path) => config::load_config(path).map_err(|e| e.to_string())?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        config::validate_config(&config).map_err(|errors| {
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        })?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("lodge: invalid configuration: {e}");
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("lodge: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(serve(config))
}

async fn serve(config: ServerConfig) -> ExitCode {
    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "lodge starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        max_connections = config.server.max_connections,
        lifespan = ?config.lifespan.mode,
        "Configuration loaded"
    );

    match Server::new(config, DemoApp).run().await {
        Ok(status) => {
            tracing::info!(?status, "lodge stopped");
            status.into()
        }
        Err(e) => {
            tracing::error!(error = %e, "lodge failed to start");
            ExitCode::FAILURE
        }
    }
}
