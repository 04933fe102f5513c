use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod env;

use cli::{Cli, Commands};
use config::{ProjectConfig, ReplicationOverrides};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env::load_dotenv(cli.env.as_deref())?;
    init_tracing(cli.verbose);

    let config = ProjectConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            iterations,
            min_interval,
            max_interval,
            slot_name,
            output,
        } => {
            let overrides = ReplicationOverrides {
                iterations,
                min_interval_ms: min_interval,
                max_interval_ms: max_interval,
                slot_name,
            };
            commands::cmd_run(config, overrides, output).await
        }
        Commands::Status { output } => commands::cmd_status(config, output).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "waltide=debug" } else { "waltide=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
