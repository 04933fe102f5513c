use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgError {
    #[error("postgres error: {0}")]
    Postgres(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("replication slot '{0}' does not exist")]
    SlotNotFound(String),

    #[error("failed to create replication slot: {0}")]
    SlotCreationFailed(String),

    #[error("replication not supported for database type {0}")]
    UnsupportedDatabase(String),

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),
}

impl From<tokio_postgres::Error> for PgError {
    fn from(e: tokio_postgres::Error) -> Self {
        // Extract database error details if available
        if let Some(db_err) = e.as_db_error() {
            let msg = format!(
                "{}: {} (code: {})",
                db_err.severity(),
                db_err.message(),
                db_err.code().code()
            );
            PgError::Postgres(msg)
        } else {
            PgError::Postgres(e.to_string())
        }
    }
}

impl From<waltide_core::Error> for PgError {
    fn from(e: waltide_core::Error) -> Self {
        match e {
            waltide_core::Error::InvalidLsn(lsn) => PgError::InvalidLsn(lsn),
            other => PgError::Postgres(other.to_string()),
        }
    }
}

impl From<PgError> for waltide_core::Error {
    fn from(e: PgError) -> Self {
        match e {
            PgError::UnsupportedDatabase(db_type) => waltide_core::Error::UnsupportedBackend(db_type),
            PgError::InvalidLsn(lsn) => waltide_core::Error::InvalidLsn(lsn),
            other => waltide_core::Error::Collaborator(other.to_string()),
        }
    }
}

pub type PgResult<T> = Result<T, PgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_database_maps_to_core_error() {
        let err: waltide_core::Error = PgError::UnsupportedDatabase("mysql".into()).into();
        assert!(matches!(err, waltide_core::Error::UnsupportedBackend(t) if t == "mysql"));
    }

    #[test]
    fn test_other_errors_map_to_collaborator() {
        let err: waltide_core::Error = PgError::SlotNotFound("osmosis".into()).into();
        assert_eq!(
            err.to_string(),
            "replication slot 'osmosis' does not exist"
        );
    }
}
