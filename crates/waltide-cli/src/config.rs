use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use waltide_core::{ReplicatorConfig, DEFAULT_SLOT_NAME};
use waltide_pg::DatabaseType;

/// Project configuration from waltide.toml
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub replication: ReplicationSettings,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type", default)]
    pub database_type: DatabaseType,
    pub connection_string: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    pub slot_name: String,
    pub iterations: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            slot_name: DEFAULT_SLOT_NAME.to_string(),
            iterations: 1,
            min_interval_ms: 0,
            max_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("replication"),
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct ReplicationOverrides {
    pub iterations: Option<u64>,
    pub min_interval_ms: Option<u64>,
    pub max_interval_ms: Option<u64>,
    pub slot_name: Option<String>,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve environment variables in a string.
    /// Supports ${VAR_NAME} syntax.
    pub fn resolve_env(&self, s: &str) -> String {
        let mut result = s.to_string();

        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let value = std::env::var(var_name).unwrap_or_default();
                result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
            } else {
                break;
            }
        }

        result
    }

    /// Get the resolved database connection string.
    pub fn database_connection_string(&self) -> Result<String> {
        let resolved = self.resolve_env(&self.database.connection_string);
        if resolved.trim().is_empty() {
            anyhow::bail!(
                "database.connection_string resolved to an empty value (from '{}')",
                self.database.connection_string
            );
        }
        Ok(resolved)
    }

    pub fn slot_name<'a>(&'a self, overrides: &'a ReplicationOverrides) -> &'a str {
        overrides
            .slot_name
            .as_deref()
            .unwrap_or(&self.replication.slot_name)
    }

    /// Engine settings with command-line overrides applied.
    pub fn replicator_config(&self, overrides: &ReplicationOverrides) -> ReplicatorConfig {
        let settings = &self.replication;
        ReplicatorConfig {
            slot_name: self.slot_name(overrides).to_string(),
            iterations: overrides.iterations.unwrap_or(settings.iterations),
            min_interval: Duration::from_millis(
                overrides.min_interval_ms.unwrap_or(settings.min_interval_ms),
            ),
            max_interval: Duration::from_millis(
                overrides.max_interval_ms.unwrap_or(settings.max_interval_ms),
            ),
            ..ReplicatorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[database]
connection_string = "postgres://${WALTIDE_TEST_DB_HOST}/osm"
"#;

    #[test]
    fn test_defaults_apply_to_minimal_config() {
        let config = ProjectConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.database.database_type, DatabaseType::Postgresql);
        assert_eq!(config.replication.slot_name, "osmosis");
        assert_eq!(config.replication.iterations, 1);
        assert_eq!(config.replication.max_interval_ms, 0);
        assert_eq!(config.output.directory, PathBuf::from("replication"));

        let engine = config.replicator_config(&ReplicationOverrides::default());
        assert_eq!(engine.slot_name, "osmosis");
        assert_eq!(engine.iterations, 1);
        assert_eq!(engine.max_interval, Duration::ZERO);
        assert_eq!(engine.poll_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_full_config_and_overrides() {
        let config = ProjectConfig::parse(
            r#"
[database]
type = "postgresql"
connection_string = "postgres://localhost/osm"

[replication]
slot_name = "minutely"
iterations = 0
min_interval_ms = 1000
max_interval_ms = 60000

[output]
directory = "/var/lib/waltide"
"#,
        )
        .unwrap();

        let engine = config.replicator_config(&ReplicationOverrides::default());
        assert_eq!(engine.slot_name, "minutely");
        assert_eq!(engine.iterations, 0);
        assert_eq!(engine.min_interval, Duration::from_secs(1));
        assert_eq!(engine.max_interval, Duration::from_secs(60));

        let overrides = ReplicationOverrides {
            iterations: Some(3),
            max_interval_ms: Some(5000),
            slot_name: Some("other".to_string()),
            ..ReplicationOverrides::default()
        };
        let engine = config.replicator_config(&overrides);
        assert_eq!(engine.slot_name, "other");
        assert_eq!(engine.iterations, 3);
        assert_eq!(engine.min_interval, Duration::from_secs(1));
        assert_eq!(engine.max_interval, Duration::from_millis(5000));
    }

    #[test]
    fn test_mysql_type_is_recognised() {
        let config = ProjectConfig::parse(
            "[database]\ntype = \"mysql\"\nconnection_string = \"mysql://localhost/osm\"\n",
        )
        .unwrap();
        assert_eq!(config.database.database_type, DatabaseType::Mysql);
    }

    #[test]
    fn test_unknown_database_type_is_rejected() {
        let result = ProjectConfig::parse(
            "[database]\ntype = \"oracle\"\nconnection_string = \"x\"\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_env() {
        std::env::set_var("WALTIDE_TEST_DB_HOST", "db.internal");

        let config = ProjectConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.resolve_env("${WALTIDE_TEST_DB_HOST}"), "db.internal");
        assert_eq!(
            config.resolve_env("prefix_${WALTIDE_TEST_DB_HOST}_suffix"),
            "prefix_db.internal_suffix"
        );
        assert_eq!(config.resolve_env("no_vars"), "no_vars");
        assert_eq!(
            config.database_connection_string().unwrap(),
            "postgres://db.internal/osm"
        );
    }

    #[test]
    fn test_empty_connection_string_is_rejected() {
        let config = ProjectConfig::parse(
            "[database]\nconnection_string = \"${WALTIDE_TEST_UNSET_VARIABLE}\"\n",
        )
        .unwrap();
        assert!(config.database_connection_string().is_err());
    }

    #[test]
    fn test_sample_config_parses() {
        let config =
            ProjectConfig::parse(include_str!("../../../waltide.toml.example")).unwrap();
        assert_eq!(config.database.database_type, DatabaseType::Postgresql);
        assert_eq!(config.replication.iterations, 0);
        assert_eq!(config.replication.max_interval_ms, 60_000);
    }
}
