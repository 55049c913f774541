use clap::{Parser, Subcommand};
use tracing::error;
use weather_core::Config;

use crate::server;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather-server",
    version,
    about = "HTTP server returning normalized weather observations for coordinates"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the HTTP server (the default when no command is given).
    Serve,

    /// Print the effective configuration as TOML, with the API key redacted.
    Config,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Config::from_env()
            .inspect_err(|err| error!(error = %err, "Load config failed"))?;

        match self.command.unwrap_or(Command::Serve) {
            Command::Serve => server::run(config).await,
            Command::Config => {
                print!("{}", config.to_redacted_toml()?);
                Ok(())
            }
        }
    }
}
