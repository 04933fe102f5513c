//! Postgres connection setup with optional TLS.

use std::future::Future;
use std::sync::Arc;

use rustls::ClientConfig;
use tokio_postgres::{Client, NoTls};
use tokio_postgres_rustls_improved::MakeRustlsConnect;
use tracing::{debug, error};

use crate::error::{PgError, PgResult};

/// Connect using TLS when the connection string's `sslmode` asks for it.
///
/// The connection task is spawned onto the runtime; only the client is returned.
pub async fn connect_postgres(connection_string: &str) -> PgResult<Client> {
    if requires_tls(connection_string) {
        debug!("Connecting to Postgres with TLS");
        let connector = MakeRustlsConnect::new(tls_config()?);
        let (client, connection) = tokio_postgres::connect(connection_string, connector)
            .await
            .map_err(|e| PgError::Connection(e.to_string()))?;
        spawn_connection(connection);
        Ok(client)
    } else {
        debug!("Connecting to Postgres without TLS");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| PgError::Connection(e.to_string()))?;
        spawn_connection(connection);
        Ok(client)
    }
}

fn spawn_connection<F>(connection: F)
where
    F: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "Postgres connection error");
        }
    });
}

fn tls_config() -> PgResult<ClientConfig> {
    Ok(
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| PgError::Connection(format!("TLS config error: {}", e)))?
            .with_root_certificates(root_certs())
            .with_no_client_auth(),
    )
}

fn root_certs() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn requires_tls(connection_string: &str) -> bool {
    ["sslmode=require", "sslmode=verify-ca", "sslmode=verify-full"]
        .iter()
        .any(|mode| connection_string.contains(mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_tls() {
        assert!(requires_tls("postgres://u:p@db/osm?sslmode=require"));
        assert!(requires_tls("host=db dbname=osm sslmode=verify-full"));
        assert!(!requires_tls("postgres://u:p@localhost/osm"));
        assert!(!requires_tls("postgres://u:p@localhost/osm?sslmode=disable"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let result = connect_postgres("postgres://nobody@127.0.0.1:1/none?connect_timeout=1").await;
        assert!(matches!(result, Err(PgError::Connection(_))));
    }
}
