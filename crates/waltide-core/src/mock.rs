//! In-memory collaborators for exercising the engine without a database.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::checkpoint::CheckpointState;
use crate::error::{Error, Result};
use crate::event::ChangeEvent;
use crate::lsn::Lsn;
use crate::source::{
    ChangeSink, HistorySource, NotificationStream, ReferenceClock, ReplicationBackend,
    SinkMetadata,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted read result.
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    Line(Lsn, String),
    Empty,
    Fail(String),
}

/// Scripted replication backend. Streams opened from it share one script.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

#[derive(Default)]
struct BackendState {
    consistent_point: Lsn,
    script: VecDeque<ScriptedRead>,
    created_slots: Vec<(String, String)>,
    opened_at: Vec<Lsn>,
    acknowledged: Vec<(Lsn, Lsn)>,
    status_pushes: usize,
    closed_streams: usize,
    fail_create: Option<String>,
    fail_status_push: Option<String>,
    fail_close: Option<String>,
}

impl MockBackend {
    /// Backend whose slots report `consistent_point` on creation.
    pub fn new(consistent_point: Lsn) -> Self {
        let backend = Self::default();
        lock(&backend.state).consistent_point = consistent_point;
        backend
    }

    pub fn failing_create(message: impl Into<String>) -> Self {
        let backend = Self::default();
        lock(&backend.state).fail_create = Some(message.into());
        backend
    }

    pub fn push_line(&self, lsn: Lsn, line: impl Into<String>) {
        lock(&self.state)
            .script
            .push_back(ScriptedRead::Line(lsn, line.into()));
    }

    /// Queue a single empty read.
    pub fn push_empty(&self) {
        lock(&self.state).script.push_back(ScriptedRead::Empty);
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        lock(&self.state)
            .script
            .push_back(ScriptedRead::Fail(message.into()));
    }

    /// Make every later status push fail with `message`.
    pub fn fail_status_push(&self, message: impl Into<String>) {
        lock(&self.state).fail_status_push = Some(message.into());
    }

    pub fn fail_close(&self, message: impl Into<String>) {
        lock(&self.state).fail_close = Some(message.into());
    }

    pub fn created_slots(&self) -> Vec<(String, String)> {
        lock(&self.state).created_slots.clone()
    }

    pub fn opened_at(&self) -> Vec<Lsn> {
        lock(&self.state).opened_at.clone()
    }

    pub fn acknowledged(&self) -> Vec<(Lsn, Lsn)> {
        lock(&self.state).acknowledged.clone()
    }

    pub fn status_pushes(&self) -> usize {
        lock(&self.state).status_pushes
    }

    pub fn closed_streams(&self) -> usize {
        lock(&self.state).closed_streams
    }

    pub fn remaining_reads(&self) -> usize {
        lock(&self.state).script.len()
    }
}

impl ReplicationBackend for MockBackend {
    type Stream = MockStream;

    async fn create_logical_source(&self, slot_name: &str, output_plugin: &str) -> Result<Lsn> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.fail_create {
            return Err(Error::Collaborator(message.clone()));
        }
        state
            .created_slots
            .push((slot_name.to_string(), output_plugin.to_string()));
        Ok(state.consistent_point)
    }

    async fn open_stream(&self, _slot_name: &str, start: Lsn) -> Result<MockStream> {
        lock(&self.state).opened_at.push(start);
        Ok(MockStream {
            state: self.state.clone(),
            last_received: start,
            acknowledged: None,
        })
    }
}

/// Stream over a [`MockBackend`] script.
pub struct MockStream {
    state: Arc<Mutex<BackendState>>,
    last_received: Lsn,
    acknowledged: Option<(Lsn, Lsn)>,
}

impl NotificationStream for MockStream {
    async fn read_pending(&mut self) -> Result<Option<String>> {
        let next = lock(&self.state).script.pop_front();
        match next {
            Some(ScriptedRead::Line(lsn, line)) => {
                self.last_received = self.last_received.max(lsn);
                Ok(Some(line))
            }
            Some(ScriptedRead::Fail(message)) => Err(Error::Collaborator(message)),
            Some(ScriptedRead::Empty) | None => Ok(None),
        }
    }

    fn last_received_position(&self) -> Lsn {
        self.last_received
    }

    fn acknowledge(&mut self, applied: Lsn, flushed: Lsn) {
        self.acknowledged = Some((applied, flushed));
    }

    async fn force_status_push(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.fail_status_push {
            return Err(Error::Collaborator(message.clone()));
        }
        if let Some(positions) = self.acknowledged {
            state.acknowledged.push(positions);
        }
        state.status_pushes += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.closed_streams += 1;
        match &state.fail_close {
            Some(message) => Err(Error::Collaborator(message.clone())),
            None => Ok(()),
        }
    }
}

/// History source answering from a fixed table.
#[derive(Clone, Default)]
pub struct MockHistory {
    state: Arc<Mutex<HistoryState>>,
}

#[derive(Default)]
struct HistoryState {
    events: HashMap<(String, i64, i64), Vec<ChangeEvent>>,
    requests: Vec<(String, i64, i64)>,
}

impl MockHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kind: &str, id: i64, version: i64, events: Vec<ChangeEvent>) {
        lock(&self.state)
            .events
            .insert((kind.to_string(), id, version), events);
    }

    pub fn requests(&self) -> Vec<(String, i64, i64)> {
        lock(&self.state).requests.clone()
    }
}

impl HistorySource for MockHistory {
    async fn get_history(&self, element_kind: &str, id: i64, version: i64) -> Result<Vec<ChangeEvent>> {
        let mut state = lock(&self.state);
        let key = (element_kind.to_string(), id, version);
        state.requests.push(key.clone());
        Ok(state.events.get(&key).cloned().unwrap_or_default())
    }
}

/// Sink that records events and keeps the committed checkpoint in memory.
#[derive(Clone, Default)]
pub struct MockSink {
    state: Arc<Mutex<SinkState>>,
}

#[derive(Default)]
struct SinkState {
    stored: Option<CheckpointState>,
    checkpoint: Option<crate::checkpoint::SharedCheckpoint>,
    pending: Vec<ChangeEvent>,
    committed: Vec<Vec<ChangeEvent>>,
    completed: Vec<CheckpointState>,
    initialized: usize,
    closed: bool,
    fail_complete: Option<String>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose durable checkpoint starts as `stored`.
    pub fn with_stored(stored: CheckpointState) -> Self {
        let sink = Self::default();
        lock(&sink.state).stored = Some(stored);
        sink
    }

    /// Make every later `complete` fail with `message`.
    pub fn fail_complete(&self, message: impl Into<String>) {
        lock(&self.state).fail_complete = Some(message.into());
    }

    /// The last committed checkpoint.
    pub fn stored(&self) -> Option<CheckpointState> {
        lock(&self.state).stored.clone()
    }

    /// Checkpoints as committed by each `complete` call.
    pub fn completed(&self) -> Vec<CheckpointState> {
        lock(&self.state).completed.clone()
    }

    /// Events grouped by the interval that committed them.
    pub fn committed(&self) -> Vec<Vec<ChangeEvent>> {
        lock(&self.state).committed.clone()
    }

    /// Events processed but not yet committed.
    pub fn pending(&self) -> Vec<ChangeEvent> {
        lock(&self.state).pending.clone()
    }

    pub fn initialized(&self) -> usize {
        lock(&self.state).initialized
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

impl ChangeSink for MockSink {
    async fn initialize(&mut self, metadata: &SinkMetadata) -> Result<()> {
        let checkpoint = metadata
            .checkpoint()
            .cloned()
            .ok_or_else(|| Error::Collaborator("missing checkpoint metadata".into()))?;

        let mut state = lock(&self.state);
        if let Some(stored) = &state.stored {
            let stored = stored.clone();
            checkpoint.update(|cp| *cp = stored);
        }
        state.checkpoint = Some(checkpoint);
        state.pending.clear();
        state.initialized += 1;
        Ok(())
    }

    async fn process(&mut self, event: ChangeEvent) -> Result<()> {
        lock(&self.state).pending.push(event);
        Ok(())
    }

    async fn complete(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.fail_complete {
            return Err(Error::Collaborator(message.clone()));
        }
        let checkpoint = state
            .checkpoint
            .clone()
            .ok_or_else(|| Error::Collaborator("sink not initialized".into()))?;
        let committed = checkpoint.update(|cp| {
            cp.sequence_number += 1;
            cp.clone()
        });

        let events = std::mem::take(&mut state.pending);
        state.committed.push(events);
        state.completed.push(committed.clone());
        state.stored = Some(committed);
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = lock(&self.state);
        state.pending.clear();
        state.closed = true;
    }
}

/// Clock that advances by a fixed step on every reading.
#[derive(Clone)]
pub struct MockClock {
    state: Arc<Mutex<ClockState>>,
}

struct ClockState {
    next: DateTime<Utc>,
    step: Duration,
    readings: usize,
}

impl MockClock {
    pub fn stepping(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                next: start,
                step,
                readings: 0,
            })),
        }
    }

    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::stepping(at, Duration::zero())
    }

    pub fn readings(&self) -> usize {
        lock(&self.state).readings
    }
}

impl ReferenceClock for MockClock {
    async fn system_time(&self) -> Result<DateTime<Utc>> {
        let mut state = lock(&self.state);
        let now = state.next;
        state.next = now + state.step;
        state.readings += 1;
        Ok(now)
    }
}
