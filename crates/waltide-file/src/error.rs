use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileSinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid state file {path}: {source}")]
    InvalidState {
        path: PathBuf,
        #[source]
        source: waltide_core::Error,
    },

    #[error("change sink used before initialize")]
    NotInitialized,
}

impl FileSinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileSinkError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<FileSinkError> for waltide_core::Error {
    fn from(e: FileSinkError) -> Self {
        waltide_core::Error::Collaborator(e.to_string())
    }
}

pub type FileSinkResult<T> = Result<T, FileSinkError>;
