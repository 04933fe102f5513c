use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use waltide_core::ReplicationEngine;
use waltide_file::{load_checkpoint, ReplicationDirectorySink};
use waltide_pg::ReplicationContext;

use crate::config::{ProjectConfig, ReplicationOverrides};

pub async fn cmd_run(
    config: ProjectConfig,
    overrides: ReplicationOverrides,
    output: Option<PathBuf>,
) -> Result<()> {
    let settings = config.replicator_config(&overrides);
    let directory = output.unwrap_or_else(|| config.output.directory.clone());

    info!(
        slot = %settings.slot_name,
        iterations = settings.iterations,
        max_interval_ms = settings.max_interval.as_millis() as u64,
        directory = %directory.display(),
        "Starting replication"
    );

    let context = ReplicationContext::connect(
        config.database.database_type,
        &config.database_connection_string()?,
    )
    .await
    .context("Failed to open the replication context")?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let engine = ReplicationEngine::with_cancellation(
        settings,
        context.clone(),
        context.history(),
        ReplicationDirectorySink::new(&directory),
        context.clock(),
        cancel,
    );
    engine.replicate().await.context("Replication failed")?;

    match load_checkpoint(&directory).await? {
        Some(state) => println!(
            "{} sequence {} at {}",
            "Replicated".green().bold(),
            state.sequence_number,
            state.lsn_max_queried
        ),
        None => println!("{}", "No replication interval completed.".yellow()),
    }

    Ok(())
}

/// Cancel replication on Ctrl-C. The engine stops at its next idle point.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing the current interval");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Unable to listen for interrupt signal"),
        }
    });
}
