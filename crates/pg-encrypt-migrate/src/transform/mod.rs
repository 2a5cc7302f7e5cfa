//! Encrypt-and-skip transform.
//!
//! For each target column of a record: NULL or blank values are left untouched,
//! values that already look like ciphertext are skipped, everything else goes
//! through the provider. A record with nothing left to migrate is filtered out,
//! which is what makes re-runs cheap and safe.

use std::ops::AddAssign;
use std::sync::Arc;

use serde::Serialize;

use crate::core::{EncryptionProvider, TargetRecord};
use crate::error::{MigrateError, Result};

/// Counters for one chunk, aggregated by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    /// Records read from the cursor.
    pub records_read: u64,
    /// Records handed to the writer.
    pub records_transformed: u64,
    /// Records with nothing to migrate.
    pub records_filtered: u64,
    /// Values sent through the provider.
    pub values_encrypted: u64,
    /// Values skipped because they already looked like ciphertext.
    pub values_already_encrypted: u64,
    /// NULL or blank values left untouched.
    pub values_null: u64,
}

impl AddAssign for ChunkStats {
    fn add_assign(&mut self, other: Self) {
        self.records_read += other.records_read;
        self.records_transformed += other.records_transformed;
        self.records_filtered += other.records_filtered;
        self.values_encrypted += other.values_encrypted;
        self.values_already_encrypted += other.values_already_encrypted;
        self.values_null += other.values_null;
    }
}

/// Applies the encryption provider to records.
#[derive(Clone)]
pub struct EncryptionTransform {
    provider: Arc<dyn EncryptionProvider>,
}

impl EncryptionTransform {
    /// Create a transform over a provider.
    pub fn new(provider: Arc<dyn EncryptionProvider>) -> Self {
        Self { provider }
    }

    /// Transform one record.
    ///
    /// Returns `Ok(None)` when the record is filtered. A provider failure aborts
    /// the whole record; no partially transformed record is ever returned.
    pub fn apply(
        &self,
        mut record: TargetRecord,
        stats: &mut ChunkStats,
    ) -> Result<Option<TargetRecord>> {
        stats.records_read += 1;

        let mut encrypted = Vec::new();
        let mut skipped = 0u64;
        let mut nulls = 0u64;

        for (index, original) in record.original_values().iter().enumerate() {
            let value = match original.as_deref() {
                Some(v) if !v.trim().is_empty() => v,
                _ => {
                    nulls += 1;
                    continue;
                }
            };
            if self.provider.looks_encrypted(value) {
                skipped += 1;
                continue;
            }
            let ciphertext = self.provider.encrypt(value).map_err(|e| {
                let column = record.layout().target_columns[index].clone();
                MigrateError::Transform {
                    table: record.table_name().to_string(),
                    column,
                    pk: record.pk_display(),
                    message: e.to_string(),
                }
            })?;
            encrypted.push((index, ciphertext));
        }

        stats.values_null += nulls;
        stats.values_already_encrypted += skipped;

        if encrypted.is_empty() {
            stats.records_filtered += 1;
            return Ok(None);
        }

        stats.values_encrypted += encrypted.len() as u64;
        stats.records_transformed += 1;
        for (index, ciphertext) in encrypted {
            record.set_transformed(index, ciphertext);
        }
        Ok(Some(record))
    }

    /// Transform a chunk, returning the records to write and the chunk's counters.
    pub fn apply_chunk(&self, records: Vec<TargetRecord>) -> Result<(Vec<TargetRecord>, ChunkStats)> {
        let mut stats = ChunkStats::default();
        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            if let Some(r) = self.apply(record, &mut stats)? {
                batch.push(r);
            }
        }
        Ok((batch, stats))
    }
}
