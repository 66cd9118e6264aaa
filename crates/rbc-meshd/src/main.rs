//! rbc-meshd - Rebroadcast mesh node
//!
//! Runs one mesh node over the emulated radio, with an operator console on
//! stdin and application events printed to stdout as JSON lines.

use clap::Parser;
use rbc_meshd::config::Config;
use rbc_meshd::console::{print_events, run_console};
use rbc_meshd::server::Server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(format: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rbc_meshd=info"));
    let (pretty, json) = if format == "json" {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stderr)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();

    // Initialize logging
    init_logging(&config.log_format);

    info!(
        "rbc-meshd v{} - Rebroadcast Mesh Node",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {:#}", e);
        return ExitCode::FAILURE;
    }

    let server = match Server::new(config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to initialize server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mesh = server.handle();
    tokio::spawn(print_events(mesh.subscribe()));
    tokio::spawn(async move {
        if let Err(e) = run_console(mesh).await {
            warn!("Console stopped: {:#}", e);
        }
    });

    // Install signal handler
    let shutdown_server = Arc::clone(&server);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_server.shutdown();
    });

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
