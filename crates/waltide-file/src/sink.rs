//! Change sink writing a replication directory.
//!
//! Layout after three completed intervals:
//!
//! ```text
//! state.txt
//! 000000001.jsonl  000000001.state.txt
//! 000000002.jsonl  000000002.state.txt
//! 000000003.jsonl  000000003.state.txt
//! ```

use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};
use waltide_core::{ChangeEvent, ChangeSink, CheckpointState, SharedCheckpoint, SinkMetadata};

use crate::error::{FileSinkError, FileSinkResult};
use crate::properties;

pub const STATE_FILE: &str = "state.txt";
const PENDING_CHANGES_FILE: &str = "changes.jsonl.tmp";
const PENDING_STATE_FILE: &str = "state.txt.tmp";
const STATE_HEADER: &str = "waltide replication state";

/// Writes each interval's events to a numbered JSON-lines file and the
/// checkpoint to `state.txt`.
pub struct ReplicationDirectorySink {
    directory: PathBuf,
    checkpoint: Option<SharedCheckpoint>,
    writer: Option<BufWriter<File>>,
    pending_events: usize,
}

impl ReplicationDirectorySink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            checkpoint: None,
            writer: None,
            pending_events: 0,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn pending_changes_path(&self) -> PathBuf {
        self.directory.join(PENDING_CHANGES_FILE)
    }

    async fn open_pending(&mut self) -> FileSinkResult<()> {
        let path = self.pending_changes_path();
        let file = File::create(&path)
            .await
            .map_err(|e| FileSinkError::io(&path, e))?;
        self.writer = Some(BufWriter::new(file));
        self.pending_events = 0;
        Ok(())
    }

    async fn write_event(&mut self, event: &ChangeEvent) -> FileSinkResult<()> {
        let path = self.pending_changes_path();
        let writer = self.writer.as_mut().ok_or(FileSinkError::NotInitialized)?;

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .map_err(|e| FileSinkError::io(&path, e))?;

        self.pending_events += 1;
        Ok(())
    }

    async fn commit(&mut self) -> FileSinkResult<CheckpointState> {
        let checkpoint = self.checkpoint.clone().ok_or(FileSinkError::NotInitialized)?;
        let mut writer = self.writer.take().ok_or(FileSinkError::NotInitialized)?;

        let pending = self.pending_changes_path();
        writer
            .flush()
            .await
            .map_err(|e| FileSinkError::io(&pending, e))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| FileSinkError::io(&pending, e))?;
        drop(writer);

        let state = checkpoint.update(|cp| {
            cp.sequence_number += 1;
            cp.clone()
        });
        let sequence = state.sequence_number;

        let changes = self.directory.join(format!("{sequence:09}.jsonl"));
        fs::rename(&pending, &changes)
            .await
            .map_err(|e| FileSinkError::io(&changes, e))?;
        sync_directory(&self.directory).await?;

        let text = properties::render(STATE_HEADER, &state.to_properties());
        let archived = self.directory.join(format!("{sequence:09}.state.txt"));
        write_atomic(&self.directory, &archived, &text).await?;
        write_atomic(&self.directory, &self.directory.join(STATE_FILE), &text).await?;

        Ok(state)
    }
}

impl ChangeSink for ReplicationDirectorySink {
    async fn initialize(&mut self, metadata: &SinkMetadata) -> waltide_core::Result<()> {
        let checkpoint = metadata
            .checkpoint()
            .cloned()
            .ok_or_else(|| waltide_core::Error::Collaborator("missing checkpoint metadata".into()))?;

        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| FileSinkError::io(&self.directory, e))?;

        if let Some(stored) = load_checkpoint(&self.directory).await? {
            debug!(state = %stored, "Loaded replication state");
            checkpoint.update(|cp| *cp = stored);
        }

        self.checkpoint = Some(checkpoint);
        self.open_pending().await?;
        Ok(())
    }

    async fn process(&mut self, event: ChangeEvent) -> waltide_core::Result<()> {
        Ok(self.write_event(&event).await?)
    }

    async fn complete(&mut self) -> waltide_core::Result<()> {
        let events = self.pending_events;
        let state = self.commit().await?;
        info!(
            sequence_number = state.sequence_number,
            events,
            directory = %self.directory.display(),
            "Wrote replication sequence"
        );
        Ok(())
    }

    async fn close(&mut self) {
        self.writer = None;
        self.checkpoint = None;

        let pending = self.pending_changes_path();
        match fs::remove_file(&pending).await {
            Ok(()) => debug!(path = %pending.display(), "Discarded uncommitted changes"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %pending.display(), error = %e, "Unable to remove pending change file"),
        }
    }
}

/// Read the checkpoint stored in `directory`, if any.
pub async fn load_checkpoint(directory: &Path) -> FileSinkResult<Option<CheckpointState>> {
    let path = directory.join(STATE_FILE);
    let text = match fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FileSinkError::io(&path, e)),
    };

    CheckpointState::from_properties(&properties::parse(&text))
        .map(Some)
        .map_err(|source| FileSinkError::InvalidState { path, source })
}

/// Replace `target` with `text`. The content and the rename are both on disk
/// when this returns.
async fn write_atomic(directory: &Path, target: &Path, text: &str) -> FileSinkResult<()> {
    let temp = directory.join(PENDING_STATE_FILE);
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp)
        .await
        .map_err(|e| FileSinkError::io(&temp, e))?;
    file.write_all(text.as_bytes())
        .await
        .map_err(|e| FileSinkError::io(&temp, e))?;
    file.sync_all()
        .await
        .map_err(|e| FileSinkError::io(&temp, e))?;
    drop(file);

    fs::rename(&temp, target)
        .await
        .map_err(|e| FileSinkError::io(target, e))?;
    sync_directory(directory).await
}

/// Flush directory entries so renames into `directory` survive a crash.
#[cfg(unix)]
async fn sync_directory(directory: &Path) -> FileSinkResult<()> {
    let dir = File::open(directory)
        .await
        .map_err(|e| FileSinkError::io(directory, e))?;
    dir.sync_all()
        .await
        .map_err(|e| FileSinkError::io(directory, e))
}

#[cfg(not(unix))]
async fn sync_directory(_directory: &Path) -> FileSinkResult<()> {
    Ok(())
}
