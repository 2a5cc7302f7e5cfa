//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database holding both the tables to migrate and the config relation.
    pub database: DatabaseConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationSettings,

    /// Encryption provider configuration.
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

/// PostgreSQL connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Schema holding the migrated tables (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Connection pool size (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Records per chunk; one write transaction per chunk (default: 1000).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Rows fetched per cursor round trip (default: 1000).
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Tables migrated concurrently (default: 5).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Name of the relation listing tables and columns to migrate.
    #[serde(default = "default_config_table")]
    pub config_table: String,

    /// Restrict the run to these tables. Empty means every active table.
    #[serde(default)]
    pub tables: Vec<String>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            fetch_size: default_fetch_size(),
            workers: default_workers(),
            config_table: default_config_table(),
            tables: Vec::new(),
        }
    }
}

/// Encryption provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Environment variable holding the base64-encoded 32-byte key.
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
        }
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_max_connections() -> usize {
    10
}

fn default_chunk_size() -> usize {
    1000
}

fn default_fetch_size() -> usize {
    1000
}

fn default_workers() -> usize {
    5
}

fn default_config_table() -> String {
    "migration_config".to_string()
}

fn default_key_env() -> String {
    "PG_ENCRYPT_KEY".to_string()
}
