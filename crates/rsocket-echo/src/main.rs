//! RSocket echo server binary
//!
//! Usage: `rsocket-echo [config.json]`. `RSOCKET_ECHO_BIND` overrides the
//! listen address.

use anyhow::Result;
use rsocket_echo::{EchoConfig, EchoServer};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = EchoConfig::load(std::env::args().nth(1))?;
    info!("Starting RSocket echo server on {}", config.bind);

    let server = EchoServer::bind(config).await?;
    tokio::select! {
        result = server.serve() => {
            if let Err(e) = result {
                error!("Server error: {:#}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    Ok(())
}
