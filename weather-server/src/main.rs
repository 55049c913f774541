//! Binary crate for the `weather-server` HTTP service.
//!
//! This crate focuses on:
//! - Request validation and JSON responses (`/weather`, `/health`)
//! - Serving connections with read/write/idle timeouts
//! - Graceful shutdown on SIGINT/SIGTERM

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod handler;
mod server;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cmd = cli::Cli::parse();
    cmd.run().await
}
