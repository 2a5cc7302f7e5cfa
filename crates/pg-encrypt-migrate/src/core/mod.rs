//! Core abstractions for the column encryption pipeline.
//!
//! - [`schema`]: configuration rows, migration units and backup column metadata
//! - [`record`]: the transient per-row record
//! - [`traits`]: the seams to the database and the encryption backend
//! - [`identifier`]: identifier validation and quoting
//!
//! Driver modules (`drivers/postgres`) implement the traits; the pipeline modules
//! (`backup`, `transform`, `writer`, `orchestrator`) only depend on this module.

pub mod identifier;
pub mod record;
pub mod schema;
pub mod traits;

pub use record::{RecordLayout, TargetRecord};
pub use schema::{
    backup_column_name, BackupColumnSpec, ConfigStatus, MigrationConfig, MigrationUnit, PkColumn,
};
pub use traits::{
    Catalog, ChunkExecutor, ConfigStore, EncryptionProvider, RecordCursor, RecordSource,
    SchemaEditor, WriteStrategy,
};
