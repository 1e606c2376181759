//! Solar Flux API - Republish NOAA solar X-ray flux as JSON
//!
//! An HTTP service returning the latest solar X-ray flux readings from the
//! NOAA GOES feed, refreshed at most once per minute.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use solarflux::cache::FluxCache;
use solarflux::cli::{Cli, StartupConfig};
use solarflux::data::XrayClient;
use solarflux::server;

/// Sets up logging to stderr, filtered by `RUST_LOG` (default `info`)
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "solarflux=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = StartupConfig::from_cli(&cli)?;

    init_tracing();

    let cache = Arc::new(FluxCache::new(XrayClient::new()));

    if config.once {
        let response = cache.get_response().await?;
        println!("{}", serde_json::to_string_pretty(&*response)?);
        return Ok(());
    }

    let listener = TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "Listening");

    tokio::select! {
        _ = server::serve(listener, cache) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down");
        }
    }

    Ok(())
}
