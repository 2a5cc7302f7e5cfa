//! Core traits for the column encryption pipeline.
//!
//! The migration engine only talks to the database and the encryption backend
//! through these seams:
//!
//! - [`Catalog`]: read-only schema introspection
//! - [`SchemaEditor`]: the single DDL the engine issues (adding a backup column)
//! - [`RecordSource`] / [`RecordCursor`]: forward-only streaming of a unit's rows
//! - [`ChunkExecutor`]: applies one [`WriteStrategy`] to a batch in one transaction
//! - [`ConfigStore`]: the configuration relation and its completion status
//! - [`EncryptionProvider`]: the opaque value transformation
//!
//! The PostgreSQL driver implements the database traits; tests use an in-memory
//! implementation of the same traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result, StatementFailure};

use super::record::TargetRecord;
use super::schema::{MigrationConfig, MigrationUnit};

/// Read-only catalog queries. No side effects; safe to call concurrently.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Primary key columns of a table in key order. Empty when the table has no
    /// primary key or does not exist.
    async fn primary_key_columns(&self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Full declared type of a column (length and precision included), or `None`
    /// when the column does not exist.
    async fn column_type(&self, schema: &str, table: &str, column: &str)
        -> Result<Option<String>>;

    /// Whether a column exists.
    async fn column_exists(&self, schema: &str, table: &str, column: &str) -> Result<bool>;
}

/// Auto-committing DDL, issued outside any row transaction.
#[async_trait]
pub trait SchemaEditor: Send + Sync {
    /// `ALTER TABLE .. ADD COLUMN` with the given declared type.
    ///
    /// Returns the raw statement failure so callers can classify it.
    async fn add_column(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        declared_type: &str,
    ) -> std::result::Result<(), StatementFailure>;
}

/// Opens streaming cursors over a unit's table.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Open a forward-only cursor selecting the unit's key and target columns.
    ///
    /// At most `fetch_size` rows are resident at a time.
    async fn open(&self, unit: &MigrationUnit, fetch_size: usize)
        -> Result<Box<dyn RecordCursor>>;
}

/// A lazy, finite, non-restartable sequence of records.
#[async_trait]
pub trait RecordCursor: Send {
    /// Next record, or `None` when the table is exhausted.
    async fn next(&mut self) -> Result<Option<TargetRecord>>;

    /// Up to `max` records. An empty vector means the table is exhausted.
    async fn next_chunk(&mut self, max: usize) -> Result<Vec<TargetRecord>> {
        let mut chunk = Vec::with_capacity(max.min(1024));
        while chunk.len() < max {
            match self.next().await? {
                Some(record) => chunk.push(record),
                None => break,
            }
        }
        Ok(chunk)
    }

    /// Release the cursor and its session. Must be called once per `open`.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Write strategies, tried in declaration order until one succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// One multi-row `UPDATE .. FROM (VALUES ..)` for the whole batch.
    Bulk,
    /// One `UPDATE` per record covering every migrated column and its backup.
    PerRecord,
    /// One `UPDATE` per migrated column per record, target and backup together.
    PerColumn,
    /// One `UPDATE` per migrated column per record, target only.
    TargetOnly,
}

impl WriteStrategy {
    /// The fallback chain in order.
    pub const CHAIN: [WriteStrategy; 4] = [
        WriteStrategy::Bulk,
        WriteStrategy::PerRecord,
        WriteStrategy::PerColumn,
        WriteStrategy::TargetOnly,
    ];

    /// Short name used in logs and results.
    pub fn name(&self) -> &'static str {
        match self {
            WriteStrategy::Bulk => "bulk",
            WriteStrategy::PerRecord => "per_record",
            WriteStrategy::PerColumn => "per_column",
            WriteStrategy::TargetOnly => "target_only",
        }
    }

    /// Whether the strategy also writes backup columns.
    pub fn writes_backup(&self) -> bool {
        !matches!(self, WriteStrategy::TargetOnly)
    }
}

impl std::fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Executes one write attempt for a batch.
#[async_trait]
pub trait ChunkExecutor: Send + Sync {
    /// Apply `strategy` to every record of `batch` inside one transaction.
    ///
    /// Commits and returns the number of rows written on success; rolls back
    /// and returns the error otherwise. The batch is never partially committed.
    async fn execute(
        &self,
        unit: &MigrationUnit,
        strategy: WriteStrategy,
        batch: &[TargetRecord],
    ) -> Result<u64>;
}

/// The configuration relation.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Create the relation if it does not exist.
    async fn init_schema(&self) -> Result<()>;

    /// Rows eligible for migration (status ACTIVE or NULL).
    async fn load_active(&self) -> Result<Vec<MigrationConfig>>;

    /// Every row, for status reporting.
    async fn load_all(&self) -> Result<Vec<MigrationConfig>>;

    /// Set a table's status to COMPLETE. Returns the number of rows updated.
    async fn mark_complete(&self, table: &str) -> Result<u64>;
}

/// Opaque value transformation.
pub trait EncryptionProvider: Send + Sync {
    /// Transform one plaintext value.
    fn encrypt(&self, plaintext: &str) -> std::result::Result<String, ProviderError>;

    /// Whether a value already looks like this provider's output.
    fn looks_encrypted(&self, value: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order() {
        assert_eq!(
            WriteStrategy::CHAIN
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>(),
            vec!["bulk", "per_record", "per_column", "target_only"]
        );
        assert!(WriteStrategy::PerColumn.writes_backup());
        assert!(!WriteStrategy::TargetOnly.writes_backup());
    }
}
