//! Notification stream over the SQL interface to logical decoding.
//!
//! Reads never block: an idle slot simply returns no rows. Rows are consumed
//! from a session-temporary copy of the slot, so each change is decoded and
//! fetched once. The durable slot only moves when `force_status_push` advances
//! it to the flushed position; if the process dies first, the copy disappears
//! with the session and the durable slot still holds every unacknowledged row.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio_postgres::Client;
use tracing::{debug, trace};
use waltide_core::{Lsn, NotificationStream, Result};

use crate::error::PgResult;
use crate::slot::{advance_slot, copy_temporary_slot, drop_slot_if_exists};

/// Default number of changes fetched per read.
pub const DEFAULT_FETCH_BATCH: i32 = 1000;

const READER_SUFFIX: &str = "_reader";
const MAX_SLOT_NAME_LEN: usize = 63;

/// Name of the temporary slot the stream reads from.
pub fn reader_slot_name(slot_name: &str) -> String {
    let keep = MAX_SLOT_NAME_LEN - READER_SUFFIX.len();
    let base: String = slot_name.chars().take(keep).collect();
    format!("{base}{READER_SUFFIX}")
}

pub struct SqlNotificationStream {
    client: Arc<Client>,
    slot_name: String,
    reader_slot: String,
    start: Lsn,
    fetch_batch: i32,
    buffer: VecDeque<(Lsn, String)>,
    rows_fetched: usize,
    last_received: Lsn,
    acknowledged: Option<(Lsn, Lsn)>,
}

impl SqlNotificationStream {
    /// Open a stream on `slot_name`, first discarding everything up to `start`.
    pub async fn open(client: Arc<Client>, slot_name: &str, start: Lsn) -> PgResult<Self> {
        if start.is_valid() {
            let at = advance_slot(&client, slot_name, start).await?;
            debug!(slot = %slot_name, start = %start, at = %at, "Advanced slot to start position");
        }

        let reader_slot = reader_slot_name(slot_name);
        if drop_slot_if_exists(&client, &reader_slot).await? {
            debug!(slot = %reader_slot, "Dropped stale reader slot");
        }
        let copied_at = copy_temporary_slot(&client, slot_name, &reader_slot).await?;
        debug!(slot = %slot_name, reader = %reader_slot, at = %copied_at, "Opened reader slot");

        Ok(Self {
            client,
            slot_name: slot_name.to_string(),
            reader_slot,
            start,
            fetch_batch: DEFAULT_FETCH_BATCH,
            buffer: VecDeque::new(),
            rows_fetched: 0,
            last_received: start,
            acknowledged: None,
        })
    }

    pub fn with_fetch_batch(mut self, fetch_batch: i32) -> Self {
        self.fetch_batch = fetch_batch.max(1);
        self
    }

    pub fn start_position(&self) -> Lsn {
        self.start
    }

    /// Total rows fetched from the server since the stream opened.
    pub fn rows_fetched(&self) -> usize {
        self.rows_fetched
    }

    async fn fill_buffer(&mut self) -> PgResult<()> {
        let rows = self
            .client
            .query(
                "SELECT lsn::text, data FROM pg_logical_slot_get_changes($1, NULL, $2)",
                &[&self.reader_slot, &self.fetch_batch],
            )
            .await?;

        self.rows_fetched += rows.len();
        for row in rows {
            let lsn: String = row.get(0);
            let data: Option<String> = row.get(1);
            self.buffer
                .push_back((lsn.parse::<Lsn>()?, data.unwrap_or_default()));
        }
        Ok(())
    }
}

impl NotificationStream for SqlNotificationStream {
    async fn read_pending(&mut self) -> Result<Option<String>> {
        if self.buffer.is_empty() {
            self.fill_buffer().await?;
        }

        Ok(self.buffer.pop_front().map(|(lsn, line)| {
            trace!(lsn = %lsn, line = %line, "Received logical replication row");
            self.last_received = self.last_received.max(lsn);
            line
        }))
    }

    fn last_received_position(&self) -> Lsn {
        self.last_received
    }

    fn acknowledge(&mut self, applied: Lsn, flushed: Lsn) {
        self.acknowledged = Some((applied, flushed));
    }

    async fn force_status_push(&mut self) -> Result<()> {
        let Some((applied, flushed)) = self.acknowledged else {
            return Ok(());
        };
        if !flushed.is_valid() {
            return Ok(());
        }

        let at = advance_slot(&self.client, &self.slot_name, flushed).await?;
        debug!(
            slot = %self.slot_name,
            applied = %applied,
            flushed = %flushed,
            at = %at,
            "Pushed replication status"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        drop_slot_if_exists(&self.client, &self.reader_slot).await?;
        debug!(slot = %self.slot_name, reader = %self.reader_slot, "Closed logical replication stream");
        Ok(())
    }
}
