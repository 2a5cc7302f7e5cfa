//! Chunked writer with a degrading fallback chain.
//!
//! A batch is first written with the cheapest strategy. If the attempt fails its
//! transaction is rolled back by the executor and the same batch is retried with
//! the next strategy, down to target-only updates. Only exhaustion of the chain
//! is an error.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::{ChunkExecutor, MigrationUnit, TargetRecord, WriteStrategy};
use crate::error::{MigrateError, Result};

/// Result of writing one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    /// Strategy that committed the batch, `None` for an empty batch.
    pub strategy: Option<WriteStrategy>,
    /// Rows updated.
    pub rows_written: u64,
    /// Strategies that failed before the committing one.
    pub fallbacks: usize,
}

/// Persists transformed batches.
pub struct ChunkedRecordWriter {
    executor: Arc<dyn ChunkExecutor>,
    chain: Vec<WriteStrategy>,
}

impl ChunkedRecordWriter {
    /// Writer using the full fallback chain.
    pub fn new(executor: Arc<dyn ChunkExecutor>) -> Self {
        Self {
            executor,
            chain: WriteStrategy::CHAIN.to_vec(),
        }
    }

    /// Restrict the chain, e.g. to skip strategies a deployment cannot use.
    pub fn with_chain(mut self, chain: Vec<WriteStrategy>) -> Self {
        self.chain = chain;
        self
    }

    /// Write a batch of records belonging to `unit`.
    pub async fn write(&self, unit: &MigrationUnit, batch: &[TargetRecord]) -> Result<WriteOutcome> {
        if batch.is_empty() {
            return Ok(WriteOutcome {
                strategy: None,
                rows_written: 0,
                fallbacks: 0,
            });
        }

        let mut last_error: Option<MigrateError> = None;
        for (attempt, strategy) in self.chain.iter().copied().enumerate() {
            match self.executor.execute(unit, strategy, batch).await {
                Ok(rows_written) => {
                    debug!(
                        "{}: wrote {} rows with {} strategy",
                        unit.full_name(),
                        rows_written,
                        strategy
                    );
                    if attempt > 0 {
                        warn!(
                            "{}: batch of {} records committed with fallback strategy {}",
                            unit.full_name(),
                            batch.len(),
                            strategy
                        );
                    }
                    return Ok(WriteOutcome {
                        strategy: Some(strategy),
                        rows_written,
                        fallbacks: attempt,
                    });
                }
                Err(e) => {
                    warn!(
                        "{}: {} strategy failed, rolling back: {}",
                        unit.full_name(),
                        strategy,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(MigrateError::Write {
            table: unit.table_name.clone(),
            attempts: self.chain.len(),
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no write strategy configured".to_string()),
        })
    }
}
