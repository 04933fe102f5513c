//! Replication context: the database connection and the slot operations on it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_postgres::Client;
use tracing::info;
use waltide_core::{Lsn, ReplicationBackend, Result};

use crate::clock::DatabaseClock;
use crate::connect::connect_postgres;
use crate::error::{PgError, PgResult};
use crate::history::ApidbHistory;
use crate::slot;
use crate::stream::SqlNotificationStream;

/// Database product a replication source runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Postgresql,
    Mysql,
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseType::Postgresql => f.write_str("postgresql"),
            DatabaseType::Mysql => f.write_str("mysql"),
        }
    }
}

impl FromStr for DatabaseType {
    type Err = PgError;

    fn from_str(s: &str) -> PgResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseType::Postgresql),
            "mysql" => Ok(DatabaseType::Mysql),
            other => Err(PgError::UnsupportedDatabase(other.to_string())),
        }
    }
}

/// Owns the replication connection and provisions slots and streams on it.
#[derive(Clone)]
pub struct ReplicationContext {
    client: Arc<Client>,
}

impl ReplicationContext {
    /// Reject database types without logical replication support.
    pub fn check_supported(database_type: DatabaseType) -> PgResult<()> {
        match database_type {
            DatabaseType::Postgresql => Ok(()),
            DatabaseType::Mysql => Err(PgError::UnsupportedDatabase(database_type.to_string())),
        }
    }

    /// Connect to the database. Fails before connecting for unsupported types.
    pub async fn connect(database_type: DatabaseType, connection_string: &str) -> PgResult<Self> {
        Self::check_supported(database_type)?;
        let client = connect_postgres(connection_string).await?;
        info!(database_type = %database_type, "Connected replication context");
        Ok(Self::from_client(Arc::new(client)))
    }

    pub fn from_client(client: Arc<Client>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn clock(&self) -> DatabaseClock {
        DatabaseClock::new(self.client.clone())
    }

    pub fn history(&self) -> ApidbHistory {
        ApidbHistory::new(self.client.clone())
    }

    pub async fn slot_info(&self, slot_name: &str) -> PgResult<Option<slot::SlotInfo>> {
        slot::slot_info(&self.client, slot_name).await
    }
}

impl ReplicationBackend for ReplicationContext {
    type Stream = SqlNotificationStream;

    async fn create_logical_source(&self, slot_name: &str, output_plugin: &str) -> Result<Lsn> {
        let consistent_point = slot::create_slot(&self.client, slot_name, output_plugin).await?;
        info!(slot = %slot_name, consistent_point = %consistent_point, "Created replication slot");
        Ok(consistent_point)
    }

    async fn open_stream(&self, slot_name: &str, start: Lsn) -> Result<SqlNotificationStream> {
        if !slot::slot_exists(&self.client, slot_name).await? {
            return Err(PgError::SlotNotFound(slot_name.to_string()).into());
        }
        Ok(SqlNotificationStream::open(self.client.clone(), slot_name, start).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_parse() {
        assert_eq!("postgresql".parse::<DatabaseType>().unwrap(), DatabaseType::Postgresql);
        assert_eq!("Postgres".parse::<DatabaseType>().unwrap(), DatabaseType::Postgresql);
        assert_eq!("mysql".parse::<DatabaseType>().unwrap(), DatabaseType::Mysql);
        assert!("oracle".parse::<DatabaseType>().is_err());
    }

    #[test]
    fn test_database_type_serde() {
        let t: DatabaseType = serde_json::from_str("\"mysql\"").unwrap();
        assert_eq!(t, DatabaseType::Mysql);
        assert_eq!(serde_json::to_string(&DatabaseType::Postgresql).unwrap(), "\"postgresql\"");
    }

    #[test]
    fn test_mysql_is_unsupported() {
        let err = ReplicationContext::check_supported(DatabaseType::Mysql).unwrap_err();
        assert_eq!(err.to_string(), "replication not supported for database type mysql");
        assert!(ReplicationContext::check_supported(DatabaseType::Postgresql).is_ok());
    }

    #[tokio::test]
    async fn test_connect_fails_fast_for_mysql() {
        // No server is contacted for an unsupported type.
        let result = ReplicationContext::connect(DatabaseType::Mysql, "mysql://nowhere/osm").await;
        let err: waltide_core::Error = result.err().unwrap().into();
        assert!(matches!(err, waltide_core::Error::UnsupportedBackend(t) if t == "mysql"));
    }
}
