use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_postgres::Client;
use waltide_core::{ReferenceClock, Result};

use crate::error::PgError;

/// Reads the current time from the database server.
#[derive(Clone)]
pub struct DatabaseClock {
    client: Arc<Client>,
}

impl DatabaseClock {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

impl ReferenceClock for DatabaseClock {
    async fn system_time(&self) -> Result<DateTime<Utc>> {
        let row = self
            .client
            .query_one("SELECT now()", &[])
            .await
            .map_err(PgError::from)?;
        Ok(row.get::<_, DateTime<Utc>>(0))
    }
}
