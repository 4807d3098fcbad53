// Copyright © Quill Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node configuration. Parsed from a single YAML file; every knob has a
//! default so a minimal config only names the backend and the upstream
//! peers. Validation happens once at startup and any violation is a fatal
//! config error (nonzero exit).

use serde::{Deserialize, Serialize};
use std::{
    net::IpAddr,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuillConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub etl_sources: Vec<EtlSourceConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_num_markers")]
    pub num_markers: u32,
    #[serde(default = "default_extractor_threads")]
    pub extractor_threads: u32,
    #[serde(default)]
    pub read_only: bool,
    /// When set, keep only this many newest ledgers (online deletion).
    #[serde(default)]
    pub online_delete: Option<u32>,
    #[serde(default)]
    pub start_sequence: Option<u32>,
    #[serde(default)]
    pub finish_sequence: Option<u32>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ssl_cert_file: Option<PathBuf>,
    #[serde(default)]
    pub ssl_key_file: Option<PathBuf>,
    #[serde(default)]
    pub log: LogConfig,
}

impl QuillConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.etl_sources.is_empty() && !self.read_only {
            return Err(ConfigError::Invalid(
                "etl_sources must be non-empty unless read_only is set".to_string(),
            ));
        }
        if self.extractor_threads == 0 {
            return Err(ConfigError::Invalid(
                "extractor_threads must be at least 1".to_string(),
            ));
        }
        if self.num_markers == 0 || self.num_markers > 256 {
            return Err(ConfigError::Invalid(
                "num_markers must be between 1 and 256".to_string(),
            ));
        }
        if let (Some(start), Some(finish)) = (self.start_sequence, self.finish_sequence) {
            if finish < start {
                return Err(ConfigError::Invalid(format!(
                    "finish_sequence {} precedes start_sequence {}",
                    finish, start
                )));
            }
        }
        if let Some(keep) = self.online_delete {
            if keep == 0 {
                return Err(ConfigError::Invalid(
                    "online_delete must keep at least one ledger".to_string(),
                ));
            }
        }
        self.database.validate()?;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Cassandra(CassandraConfig),
    Postgres(PostgresConfig),
    Mock,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::Mock
    }
}

impl DatabaseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            DatabaseConfig::Cassandra(cassandra) => {
                if cassandra.contact_points.is_empty() {
                    return Err(ConfigError::Invalid(
                        "cassandra.contact_points must be non-empty".to_string(),
                    ));
                }
                if cassandra.max_requests_outstanding == 0 {
                    return Err(ConfigError::Invalid(
                        "cassandra.max_requests_outstanding must be positive".to_string(),
                    ));
                }
                Ok(())
            },
            DatabaseConfig::Postgres(postgres) => {
                if postgres.contact_points.is_empty() {
                    return Err(ConfigError::Invalid(
                        "postgres.contact_points must be non-empty".to_string(),
                    ));
                }
                Ok(())
            },
            DatabaseConfig::Mock => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CassandraConfig {
    pub contact_points: Vec<String>,
    #[serde(default = "default_cassandra_port")]
    pub port: u16,
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    #[serde(default)]
    pub table_prefix: String,
    #[serde(default = "default_max_requests_outstanding")]
    pub max_requests_outstanding: usize,
    #[serde(default = "default_db_threads")]
    pub threads: usize,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
    /// Row TTL in seconds; 0 disables expiry.
    #[serde(default)]
    pub ttl: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresConfig {
    pub contact_points: Vec<String>,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    #[serde(default = "default_postgres_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_postgres_database")]
    pub database: String,
    #[serde(default)]
    pub table_prefix: String,
    #[serde(default = "default_max_requests_outstanding")]
    pub max_requests_outstanding: usize,
    #[serde(default = "default_db_threads")]
    pub threads: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EtlSourceConfig {
    pub ip: IpAddr,
    pub ws_port: u16,
    pub grpc_port: u16,
    /// Commands for peer-assisted cache warm-up. Accepted for config
    /// compatibility; the loader currently seeds its cursors from recent
    /// diffs instead.
    #[serde(default)]
    pub cache: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLoadStyle {
    Sync,
    #[default]
    Async,
    None,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default)]
    pub load: CacheLoadStyle,
    /// Recent ledger diffs used to seed parallel cursors for the initial
    /// cache download.
    #[serde(default = "default_num_diffs")]
    pub num_diffs: u32,
    #[serde(default = "default_num_cache_markers")]
    pub num_markers: u32,
    #[serde(default = "default_cache_page_fetch_size")]
    pub page_fetch_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            load: CacheLoadStyle::default(),
            num_diffs: default_num_diffs(),
            num_markers: default_num_cache_markers(),
            page_fetch_size: default_cache_page_fetch_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_server_ip")]
    pub ip: IpAddr,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: default_server_ip(),
            port: default_server_port(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_rotation_size")]
    pub rotation_size_mb: u64,
    #[serde(default = "default_log_rotation_hours")]
    pub rotation_hour_interval: u64,
    #[serde(default = "default_log_directory_max_size")]
    pub directory_max_size_mb: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
            rotation_size_mb: default_log_rotation_size(),
            rotation_hour_interval: default_log_rotation_hours(),
            directory_max_size_mb: default_log_directory_max_size(),
        }
    }
}

fn default_num_markers() -> u32 {
    16
}

fn default_extractor_threads() -> u32 {
    1
}

fn default_cassandra_port() -> u16 {
    9042
}

fn default_keyspace() -> String {
    "quill".to_string()
}

fn default_max_requests_outstanding() -> usize {
    10_000
}

fn default_db_threads() -> usize {
    2
}

fn default_replication_factor() -> u32 {
    3
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_user() -> String {
    "postgres".to_string()
}

fn default_postgres_database() -> String {
    "quill".to_string()
}

fn default_num_diffs() -> u32 {
    32
}

fn default_num_cache_markers() -> u32 {
    48
}

fn default_cache_page_fetch_size() -> u32 {
    512
}

fn default_server_ip() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_server_port() -> u16 {
    51233
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_rotation_size() -> u64 {
    2048
}

fn default_log_rotation_hours() -> u64 {
    12
}

fn default_log_directory_max_size() -> u64 {
    50 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_ok};

    fn minimal_yaml() -> &'static str {
        r#"
database:
  type: cassandra
  contact_points: ["127.0.0.1"]
etl_sources:
  - ip: 127.0.0.1
    ws_port: 6006
    grpc_port: 50051
"#
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: QuillConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_ok!(config.validate());
        assert_eq!(config.num_markers, 16);
        assert_eq!(config.extractor_threads, 1);
        assert_eq!(config.cache.load, CacheLoadStyle::Async);
        assert_eq!(config.cache.num_markers, 48);
        assert!(!config.read_only);
        match &config.database {
            DatabaseConfig::Cassandra(cassandra) => {
                assert_eq!(cassandra.port, 9042);
                assert_eq!(cassandra.keyspace, "quill");
                assert_eq!(cassandra.replication_factor, 3);
            },
            other => panic!("expected cassandra config, got {:?}", other),
        }
    }

    #[test]
    fn writer_without_sources_is_rejected() {
        let config: QuillConfig = serde_yaml::from_str(
            r#"
database:
  type: mock
"#,
        )
        .unwrap();
        assert_err!(config.validate());

        let read_only: QuillConfig = serde_yaml::from_str(
            r#"
database:
  type: mock
read_only: true
"#,
        )
        .unwrap();
        assert_ok!(read_only.validate());
    }

    #[test]
    fn unknown_backend_type_is_rejected_at_parse() {
        let result: Result<QuillConfig, _> = serde_yaml::from_str(
            r#"
database:
  type: leveldb
"#,
        );
        assert_err!(result);
    }

    #[test]
    fn inverted_sequence_bounds_are_rejected() {
        let mut config: QuillConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.start_sequence = Some(500);
        config.finish_sequence = Some(400);
        assert_err!(config.validate());
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quill.yaml");
        std::fs::write(&path, minimal_yaml()).unwrap();
        let config = assert_ok!(QuillConfig::load(&path));
        assert_eq!(config.etl_sources.len(), 1);
        assert_err!(QuillConfig::load(&dir.path().join("missing.yaml")));
    }
}
