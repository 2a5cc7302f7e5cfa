//! # pg-encrypt-migrate
//!
//! In-place column encryption for PostgreSQL tables.
//!
//! For every table listed in the `migration_config` relation the library:
//!
//! - **Discovers the primary key** (composite keys included) from the catalog
//! - **Adds backup columns** (`<column>_bak`, same declared type) exactly once
//! - **Streams rows** through a server-side cursor with bounded memory
//! - **Encrypts values**, skipping NULLs and values that are already ciphertext
//! - **Writes chunks** with a bulk-first fallback chain, one transaction per chunk
//! - **Marks the table COMPLETE** so later runs skip it
//!
//! Runs are safe to repeat after a crash: already encrypted values are detected
//! and left alone, and the backup column keeps the original plaintext.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pg_encrypt_migrate::{AesGcmProvider, Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> pg_encrypt_migrate::Result<()> {
//! let config = Config::load("config.yaml")?;
//! let provider = AesGcmProvider::from_env(&config.encryption.key_env)?;
//! let orchestrator = Orchestrator::new(config).await?.with_provider(Arc::new(provider));
//! let result = orchestrator.run(CancellationToken::new(), false).await?;
//! println!("Encrypted {} values", result.values_encrypted);
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod core;
pub mod crypto;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod transform;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use backup::{BackupAction, BackupColumnManager, BackupReport};
pub use config::{Config, DatabaseConfig, EncryptionConfig, MigrationSettings};
pub use crate::core::{
    ConfigStatus, EncryptionProvider, MigrationConfig, MigrationUnit, TargetRecord, WriteStrategy,
};
pub use crypto::{looks_like_base64_ciphertext, AesGcmProvider};
pub use drivers::postgres::HealthCheckResult;
pub use error::{MigrateError, Result};
pub use orchestrator::{Backends, MigrationResult, Orchestrator, UnitResult, UnitStatus};
pub use transform::{ChunkStats, EncryptionTransform};
pub use writer::{ChunkedRecordWriter, WriteOutcome};
