use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use waltide_file::load_checkpoint;
use waltide_pg::ReplicationContext;

use crate::config::ProjectConfig;

pub async fn cmd_status(config: ProjectConfig, output: Option<PathBuf>) -> Result<()> {
    let directory = output.unwrap_or_else(|| config.output.directory.clone());

    let state = load_checkpoint(&directory)
        .await
        .with_context(|| format!("Failed to read replication state in {}", directory.display()))?;

    let slot_name = match &state {
        Some(state) => {
            println!("\n{}", "Replication State:".bold());
            println!("  {:<18} {}", "Directory", directory.display());
            println!("  {:<18} {}", "Slot", state.slot_name.as_deref().unwrap_or("-"));
            println!("  {:<18} {}", "Sequence", state.sequence_number);
            println!("  {:<18} {}", "LSN max", state.lsn_max);
            println!("  {:<18} {}", "LSN max queried", state.lsn_max_queried);
            println!(
                "  {:<18} {}",
                "Timestamp",
                waltide_core::checkpoint::format_timestamp(state.timestamp)
            );
            state
                .slot_name
                .clone()
                .unwrap_or_else(|| config.replication.slot_name.clone())
        }
        None => {
            println!(
                "No replication state found in {}. Run 'waltide run' to start replicating.",
                directory.display()
            );
            config.replication.slot_name.clone()
        }
    };

    let context = ReplicationContext::connect(
        config.database.database_type,
        &config.database_connection_string()?,
    )
    .await
    .context("Failed to connect to the replication database")?;

    println!("\n{}", "Replication Slot:".bold());
    match context.slot_info(&slot_name).await? {
        Some(info) => {
            println!("  {:<18} {}", "Name", info.slot_name);
            println!("  {:<18} {}", "Plugin", info.plugin.as_deref().unwrap_or("-"));
            let active = if info.active {
                "yes".yellow()
            } else {
                "no".normal()
            };
            println!("  {:<18} {}", "Active", active);
            match info.confirmed_flush_lsn {
                Some(lsn) => println!("  {:<18} {}", "Confirmed flush", lsn),
                None => println!("  {:<18} -", "Confirmed flush"),
            }
        }
        None => println!("  {}", format!("Slot '{}' does not exist", slot_name).red()),
    }

    println!();
    Ok(())
}
