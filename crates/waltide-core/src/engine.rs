//! The interval-based replication loop.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointState, SharedCheckpoint};
use crate::error::{Error, Result};
use crate::interval::{IdleDecision, IntervalController};
use crate::notification::{Notification, TransactionFlag};
use crate::source::{
    ChangeSink, HistorySource, NotificationStream, ReferenceClock, ReplicationBackend,
    SinkMetadata,
};

/// Output plugin every slot is created with.
pub const OUTPUT_PLUGIN: &str = "osm-logical";

pub const DEFAULT_SLOT_NAME: &str = "osmosis";

/// Settings for a replication run.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    pub slot_name: String,
    /// Number of intervals to run; `0` runs until cancelled.
    pub iterations: u64,
    pub min_interval: Duration,
    /// Longest idle period before an interval ends.
    pub max_interval: Duration,
    /// Sleep between empty reads.
    pub poll_delay: Duration,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            slot_name: DEFAULT_SLOT_NAME.to_string(),
            iterations: 1,
            min_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            poll_delay: Duration::from_secs(1),
        }
    }
}

/// Drives replication intervals from a logical slot into a change sink.
pub struct ReplicationEngine<B, H, S, C> {
    config: ReplicatorConfig,
    controller: IntervalController,
    backend: B,
    history: H,
    sink: S,
    clock: C,
    cancel: CancellationToken,
}

impl<B, H, S, C> ReplicationEngine<B, H, S, C>
where
    B: ReplicationBackend,
    H: HistorySource,
    S: ChangeSink,
    C: ReferenceClock,
{
    pub fn new(config: ReplicatorConfig, backend: B, history: H, sink: S, clock: C) -> Self {
        Self::with_cancellation(config, backend, history, sink, clock, CancellationToken::new())
    }

    pub fn with_cancellation(
        config: ReplicatorConfig,
        backend: B,
        history: H,
        sink: S,
        clock: C,
        cancel: CancellationToken,
    ) -> Self {
        let controller = IntervalController::new(config.min_interval, config.max_interval);
        Self {
            config,
            controller,
            backend,
            history,
            sink,
            clock,
            cancel,
        }
    }

    /// Token that stops the run at the next idle point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the configured number of intervals.
    ///
    /// The sink is closed before returning, whether or not replication failed.
    pub async fn replicate(mut self) -> Result<()> {
        let result = self.run_intervals().await;
        self.sink.close().await;
        result
    }

    async fn run_intervals(&mut self) -> Result<()> {
        let mut completed: u64 = 0;

        while self.config.iterations == 0 || completed < self.config.iterations {
            if self.cancel.is_cancelled() {
                info!(completed, "Replication cancelled");
                break;
            }

            let checkpoint = self.run_interval().await?;
            completed += 1;
            info!(
                iteration = completed,
                lsn_max = %checkpoint.lsn_max,
                lsn_max_queried = %checkpoint.lsn_max_queried,
                sequence_number = checkpoint.sequence_number,
                "Replication sequence complete"
            );
        }

        debug!("Exiting replication loop");
        Ok(())
    }

    async fn run_interval(&mut self) -> Result<CheckpointState> {
        let checkpoint = SharedCheckpoint::default();
        let metadata = SinkMetadata::with_checkpoint(checkpoint.clone());

        self.sink
            .initialize(&metadata)
            .await
            .map_err(fatal("Unable to initialize the change sink."))?;

        self.prepare_slot(&checkpoint).await?;

        let start = checkpoint.read(|cp| cp.lsn_max_queried);
        debug!(slot = %self.config.slot_name, start = %start, "Begin streaming logical changes");
        let mut stream = self
            .backend
            .open_stream(&self.config.slot_name, start)
            .await
            .map_err(fatal("Unable to start logical replication stream."))?;

        let result = self.stream_interval(&mut stream, &checkpoint).await;

        if let Err(e) = stream.close().await {
            warn!(error = %e, "Unable to close logical replication stream");
        }

        result.map(|()| checkpoint.snapshot())
    }

    /// Record the slot name and provision the slot on first use.
    async fn prepare_slot(&self, checkpoint: &SharedCheckpoint) -> Result<()> {
        let slot_name = self.config.slot_name.as_str();
        checkpoint.update(|cp| cp.assign_slot_name(slot_name))?;

        if checkpoint.read(CheckpointState::is_never_replicated) {
            info!(slot = %slot_name, plugin = OUTPUT_PLUGIN, "Creating logical replication slot");
            let consistent_point = self
                .backend
                .create_logical_source(slot_name, OUTPUT_PLUGIN)
                .await
                .map_err(|e| {
                    Error::fatal(format!("Unable to create replication slot {slot_name}."), e)
                })?;
            checkpoint.update(|cp| cp.lsn_max_queried = consistent_point);
        }

        Ok(())
    }

    async fn stream_interval(
        &mut self,
        stream: &mut B::Stream,
        checkpoint: &SharedCheckpoint,
    ) -> Result<()> {
        let clock_at_start = self.system_time().await?;
        info!(
            max_interval_ms = self.controller.max_interval().as_millis() as u64,
            system_time = %clock_at_start,
            "Entering replication loop"
        );

        let mut flag = TransactionFlag::Idle;
        loop {
            let line = stream
                .read_pending()
                .await
                .map_err(fatal("Unable to receive new logical replication data."))?;

            match line {
                Some(line) => {
                    let notification = Notification::parse(&line);
                    flag = flag.apply(&notification);
                    self.handle(notification, checkpoint).await?;
                }
                None => {
                    // The store clock is only read when no transaction is open.
                    let decision = if flag.in_transaction() {
                        IdleDecision::InTransaction
                    } else {
                        let now = self.system_time().await?;
                        self.controller.evaluate(false, clock_at_start, now)
                    };

                    match decision {
                        IdleDecision::InTransaction => {
                            debug!("Waiting for the open transaction to commit");
                            tokio::time::sleep(self.config.poll_delay).await;
                            continue;
                        }
                        IdleDecision::Exhausted { remaining_ms } => {
                            debug!(remaining_ms, "Ending because idle interval is exhausted");
                            break;
                        }
                        IdleDecision::ClockSkew { remaining_ms } => {
                            debug!(remaining_ms, "Ending because remaining interval exceeds maximum");
                            break;
                        }
                        IdleDecision::Wait { remaining_ms } => {
                            debug!(remaining_ms, "Waiting for more data");
                        }
                    }

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            info!("Cancellation requested, ending interval");
                            break;
                        }
                        _ = tokio::time::sleep(self.config.poll_delay) => {}
                    }
                }
            }
        }

        let system_time = self.system_time().await?;
        let last_received = stream.last_received_position();
        let applied = checkpoint.update(|cp| {
            cp.finish_interval(last_received, system_time);
            cp.lsn_max_queried
        });

        self.sink
            .complete()
            .await
            .map_err(fatal("Unable to complete the change sink."))?;

        stream.acknowledge(applied, applied);
        stream
            .force_status_push()
            .await
            .map_err(fatal("Failed to update logical replication status."))?;

        Ok(())
    }

    async fn handle(
        &mut self,
        notification: Notification,
        checkpoint: &SharedCheckpoint,
    ) -> Result<()> {
        match notification {
            Notification::Begin => debug!("Received a BEGIN"),
            Notification::Commit => debug!("Received a COMMIT"),
            Notification::Update => debug!("Received an UPDATE"),
            Notification::Unknown(line) => {
                info!(line = %line, "Received unknown stream message");
            }
            Notification::New(entity) => {
                info!(
                    kind = %entity.element_kind,
                    id = entity.id,
                    version = entity.version,
                    "NEW"
                );
                let events = self
                    .history
                    .get_history(&entity.element_kind, entity.id, entity.version)
                    .await
                    .map_err(fatal("Unable to load entity history."))?;

                for event in events {
                    let timestamp = event.timestamp();
                    self.sink
                        .process(event)
                        .await
                        .map_err(fatal("Unable to process change event."))?;
                    checkpoint.update(|cp| cp.advance_timestamp(timestamp));
                }
            }
        }
        Ok(())
    }

    async fn system_time(&self) -> Result<DateTime<Utc>> {
        let now = self
            .clock
            .system_time()
            .await
            .map_err(fatal("Unable to read the database system time."))?;
        debug!(system_time = %now, "Loaded system time from the database");
        Ok(now)
    }
}

fn fatal(message: &'static str) -> impl FnOnce(Error) -> Error {
    move |cause| Error::fatal(message, cause)
}
