use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "waltide")]
#[command(about = "Replicate committed changes from a Postgres logical slot into a replication directory")]
#[command(version)]
pub struct Cli {
    /// Path to waltide.toml config file
    #[arg(short, long, global = true, default_value = "waltide.toml")]
    pub config: PathBuf,

    /// Environment to load (loads .env.{ENV} instead of .env)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run replication intervals
    Run {
        /// Number of intervals to run (0 runs until interrupted)
        #[arg(long)]
        iterations: Option<u64>,

        /// Minimum interval length in milliseconds (accepted, currently unused)
        #[arg(long, value_name = "MS")]
        min_interval: Option<u64>,

        /// Longest idle period in milliseconds before an interval ends
        #[arg(long, value_name = "MS")]
        max_interval: Option<u64>,

        /// Logical replication slot name
        #[arg(long)]
        slot_name: Option<String>,

        /// Replication directory to write to
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show the stored checkpoint and the slot's server-side state
    Status {
        /// Replication directory to read
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides_parse() {
        let cli = Cli::parse_from([
            "waltide",
            "run",
            "--iterations",
            "0",
            "--max-interval",
            "60000",
            "--slot-name",
            "replica",
        ]);

        match cli.command {
            Commands::Run {
                iterations,
                max_interval,
                slot_name,
                min_interval,
                output,
            } => {
                assert_eq!(iterations, Some(0));
                assert_eq!(max_interval, Some(60000));
                assert_eq!(slot_name.as_deref(), Some("replica"));
                assert_eq!(min_interval, None);
                assert_eq!(output, None);
            }
            Commands::Status { .. } => panic!("expected run"),
        }
        assert_eq!(cli.config, PathBuf::from("waltide.toml"));
    }
}
