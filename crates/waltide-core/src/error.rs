use thiserror::Error;

/// Boxed error used as the cause of a fatal replication failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while replicating.
#[derive(Debug, Error)]
pub enum Error {
    /// A fatal failure carrying a description and the original cause.
    #[error("{message}")]
    Fatal {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("replication not supported for database type {0}")]
    UnsupportedBackend(String),

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),

    #[error("invalid checkpoint property '{key}': {message}")]
    InvalidCheckpoint { key: String, message: String },

    #[error("checkpoint belongs to slot '{recorded}' but slot '{configured}' was requested")]
    SlotMismatch { recorded: String, configured: String },

    #[error("{0}")]
    Collaborator(String),
}

impl Error {
    /// Wrap a cause into a fatal error with a descriptive message.
    pub fn fatal(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Fatal {
            message: message.into(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_fatal_keeps_cause() {
        let err = Error::fatal(
            "Unable to receive new logical replication data.",
            Error::Collaborator("connection reset".into()),
        );

        assert_eq!(err.to_string(), "Unable to receive new logical replication data.");
        assert_eq!(err.source().unwrap().to_string(), "connection reset");
    }
}
