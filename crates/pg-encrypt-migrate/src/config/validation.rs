//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.database.host.is_empty() {
        return Err(MigrateError::Config("database.host is required".into()));
    }
    if config.database.database.is_empty() {
        return Err(MigrateError::Config("database.database is required".into()));
    }
    if config.database.user.is_empty() {
        return Err(MigrateError::Config("database.user is required".into()));
    }
    validate_identifier(&config.database.schema)?;
    SslMode::parse(&config.database.ssl_mode)?;

    if config.migration.workers == 0 {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if config.migration.chunk_size == 0 {
        return Err(MigrateError::Config(
            "migration.chunk_size must be at least 1".into(),
        ));
    }
    if config.migration.fetch_size == 0 {
        return Err(MigrateError::Config(
            "migration.fetch_size must be at least 1".into(),
        ));
    }

    // Each unit holds a reader session and a writer session at the same time.
    let needed = config.migration.workers.saturating_mul(2);
    if config.database.max_connections < needed {
        return Err(MigrateError::Config(format!(
            "database.max_connections ({}) must be at least {} (reader + writer for each of {} workers)",
            config.database.max_connections, needed, config.migration.workers
        )));
    }

    validate_identifier(&config.migration.config_table)?;
    for table in &config.migration.tables {
        validate_identifier(table)?;
    }

    if config.encryption.key_env.is_empty() {
        return Err(MigrateError::Config("encryption.key_env is required".into()));
    }

    Ok(())
}
