//! Collaborator traits the replication engine is generic over.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::checkpoint::SharedCheckpoint;
use crate::error::Result;
use crate::event::ChangeEvent;
use crate::lsn::Lsn;

/// Metadata key under which the engine publishes the interval checkpoint.
pub const CHECKPOINT_METADATA_KEY: &str = "replication.state";

/// Typed values handed to a sink when it is initialized.
#[derive(Clone, Default)]
pub struct SinkMetadata {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl SinkMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata carrying only the interval checkpoint.
    pub fn with_checkpoint(checkpoint: SharedCheckpoint) -> Self {
        let mut metadata = Self::new();
        metadata.insert(CHECKPOINT_METADATA_KEY, checkpoint);
        metadata
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Look up `key`, returning `None` if absent or of a different type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn checkpoint(&self) -> Option<&SharedCheckpoint> {
        self.get(CHECKPOINT_METADATA_KEY)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for SinkMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkMetadata")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Resolves a committed entity version into change events.
pub trait HistorySource: Send + Sync {
    /// Events for `(kind, id, version)`, ordered as they should be emitted.
    fn get_history(
        &self,
        element_kind: &str,
        id: i64,
        version: i64,
    ) -> impl Future<Output = Result<Vec<ChangeEvent>>> + Send;
}

/// Receives change events and persists the checkpoint.
///
/// The sink finds the interval checkpoint in the metadata passed to
/// `initialize` and is expected to hydrate it from its durable copy there.
/// `complete` persists the events and the checkpoint together.
pub trait ChangeSink: Send {
    fn initialize(&mut self, metadata: &SinkMetadata) -> impl Future<Output = Result<()>> + Send;

    fn process(&mut self, event: ChangeEvent) -> impl Future<Output = Result<()>> + Send;

    fn complete(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Release resources. Must not fail.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Handle on an open logical replication stream.
pub trait NotificationStream: Send {
    /// Next pending notification line, or `None` when nothing is pending.
    /// Never waits for new data.
    fn read_pending(&mut self) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Greatest position received so far; never below the start position.
    fn last_received_position(&self) -> Lsn;

    /// Record the applied and flushed positions for the next status push.
    fn acknowledge(&mut self, applied: Lsn, flushed: Lsn);

    /// Report the acknowledged positions to the server now.
    fn force_status_push(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Provisions replication slots and opens streams on them.
pub trait ReplicationBackend: Send + Sync {
    type Stream: NotificationStream;

    /// Create a logical replication slot, returning its consistent point.
    fn create_logical_source(
        &self,
        slot_name: &str,
        output_plugin: &str,
    ) -> impl Future<Output = Result<Lsn>> + Send;

    fn open_stream(
        &self,
        slot_name: &str,
        start: Lsn,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// The store's notion of the current time.
pub trait ReferenceClock: Send + Sync {
    fn system_time(&self) -> impl Future<Output = Result<DateTime<Utc>>> + Send;
}
