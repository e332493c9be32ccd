use std::{error::Error, net::SocketAddr, sync::Arc};

use boltwire::{BoltServer, EchoExecutor, ServerConfig};
use clap::Parser;
use log::info;

/// Serves the echo executor over Bolt so drivers can be pointed at it.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    #[arg(long, default_value = "0.0.0.0:7687")]
    address: SocketAddr,
    /// Connections served at once
    #[arg(long, default_value_t = 100)]
    max_connections: usize,
    /// Log every query with its user and peer
    #[arg(long)]
    log_queries: bool,
    /// Refuse HELLO and RUN instead of admitting every client
    #[arg(long)]
    require_auth: bool,
    /// Accept the `none` auth scheme
    #[arg(long)]
    allow_anonymous: bool,
    /// Answer IGNORED after a FAILURE until the client sends RESET
    #[arg(long)]
    ignore_after_failure: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ServerConfig {
        address: cli.address,
        max_connections: cli.max_connections,
        log_queries: cli.log_queries,
        require_auth: cli.require_auth,
        allow_anonymous: cli.allow_anonymous,
        ignore_after_failure: cli.ignore_after_failure,
        ..ServerConfig::default()
    };

    let server = BoltServer::bind(config, Arc::new(EchoExecutor))?;
    let handle = server.shutdown_handle()?;
    ctrlc::set_handler(move || {
        info!("interrupted, shutting down");
        handle.shutdown();
    })?;

    server.listen()?;
    Ok(())
}
