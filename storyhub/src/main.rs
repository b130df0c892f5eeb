//! storyhub: build, watch and query story indexes.
//!
//! ```bash
//! storyhub index                      # build once, write the configured output
//! storyhub watch -v                   # rebuild on every story file change
//! storyhub resolve example-button     # first story whose id starts with the prefix
//! storyhub resolve --title Example/Button --name Primary
//! ```

mod cli;
mod commands;
mod config;
mod logging;

use clap::Parser;
use cli::{Cli, Command};
use config::Settings;
use logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format.into()))?;

    match &cli.command {
        Command::Index(args) => {
            let settings = Settings::load(cli.config.as_deref(), args.output.as_deref()).await?;
            commands::run_index(&settings, args).await
        }
        Command::Watch(args) => {
            let settings = Settings::load(cli.config.as_deref(), args.output.as_deref()).await?;
            commands::run_watch(&settings, args).await
        }
        Command::Resolve(args) => {
            let settings = Settings::load(cli.config.as_deref(), None).await?;
            commands::run_resolve(&settings, args).await
        }
    }
}
