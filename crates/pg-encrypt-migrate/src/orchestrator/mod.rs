//! Migration orchestrator - drives one migration unit per configured table.
//!
//! A run loads the active configuration rows, merges them into units, and
//! migrates units concurrently on a bounded worker pool. Each unit runs
//! sequentially: backup columns, cursor, then transform and write chunk by
//! chunk. A unit that finishes is marked COMPLETE; a unit that fails keeps its
//! status so the next run picks it up again, skipping rows already encrypted.

mod plan;

pub use plan::{plan_units, resolve_unit, UnitPlan};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backup::BackupColumnManager;
use crate::config::Config;
use crate::core::{
    Catalog, ChunkExecutor, ConfigStore, EncryptionProvider, MigrationConfig, MigrationUnit,
    RecordCursor, RecordSource, SchemaEditor,
};
use crate::drivers::postgres::{self, PgCatalog, PgChunkExecutor, PgConfigStore, PgRecordSource};
use crate::error::{MigrateError, Result, EXIT_CANCELLED, EXIT_PROCESSING_ERROR};
use crate::transform::{ChunkStats, EncryptionTransform};
use crate::writer::{ChunkedRecordWriter, WriteOutcome};

/// The database seams the orchestrator drives.
#[derive(Clone)]
pub struct Backends {
    pub catalog: Arc<dyn Catalog>,
    pub editor: Arc<dyn SchemaEditor>,
    pub source: Arc<dyn RecordSource>,
    pub executor: Arc<dyn ChunkExecutor>,
    pub store: Arc<dyn ConfigStore>,
}

impl Backends {
    /// PostgreSQL implementations sharing one pool.
    pub fn postgres(pool: deadpool_postgres::Pool, schema: &str, config_table: &str) -> Result<Self> {
        let catalog = Arc::new(PgCatalog::new(pool.clone()));
        Ok(Self {
            catalog: catalog.clone(),
            editor: catalog,
            source: Arc::new(PgRecordSource::new(pool.clone())),
            executor: Arc::new(PgChunkExecutor::new(pool.clone())),
            store: Arc::new(PgConfigStore::new(pool, schema, config_table)?),
        })
    }

    /// One object implementing every seam.
    pub fn shared<T>(db: Arc<T>) -> Self
    where
        T: Catalog + SchemaEditor + RecordSource + ChunkExecutor + ConfigStore + 'static,
    {
        Self {
            catalog: db.clone(),
            editor: db.clone(),
            source: db.clone(),
            executor: db.clone(),
            store: db,
        }
    }
}

/// Final state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Every row processed and the config row marked COMPLETE.
    Completed,
    /// Stopped by an error; status left unchanged.
    Failed,
    /// Stopped at a chunk boundary by cancellation.
    Cancelled,
    /// Dry run: the unit resolved and would be migrated.
    Planned,
}

/// Per-unit outcome.
#[derive(Debug, Clone, Serialize)]
pub struct UnitResult {
    pub table: String,
    pub status: UnitStatus,
    pub target_columns: Vec<String>,
    pub pk_columns: Vec<String>,
    pub backup_columns_created: usize,
    pub chunks: u64,
    pub rows_written: u64,
    #[serde(flatten)]
    pub stats: ChunkStats,
    /// Chunks committed per write strategy.
    pub strategies: BTreeMap<String, u64>,
    /// Chunks that needed at least one fallback.
    pub fallback_chunks: u64,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub exit_code: Option<u8>,
}

impl UnitResult {
    fn new(plan: &UnitPlan) -> Self {
        Self {
            table: plan.table_name.clone(),
            status: UnitStatus::Failed,
            target_columns: plan.target_columns.clone(),
            pk_columns: Vec::new(),
            backup_columns_created: 0,
            chunks: 0,
            rows_written: 0,
            stats: ChunkStats::default(),
            strategies: BTreeMap::new(),
            fallback_chunks: 0,
            duration_seconds: 0.0,
            error: None,
            exit_code: None,
        }
    }

    fn cancelled(plan: &UnitPlan) -> Self {
        let mut result = Self::new(plan);
        result.status = UnitStatus::Cancelled;
        result
    }

    fn fail(&mut self, e: &MigrateError) {
        self.status = UnitStatus::Failed;
        self.error = Some(e.to_string());
        self.exit_code = Some(e.exit_code());
    }

    fn absorb(&mut self, stats: ChunkStats, outcome: WriteOutcome) {
        self.chunks += 1;
        self.stats += stats;
        self.rows_written += outcome.rows_written;
        if let Some(strategy) = outcome.strategy {
            *self.strategies.entry(strategy.name().to_string()).or_default() += 1;
        }
        if outcome.fallbacks > 0 {
            self.fallback_chunks += 1;
        }
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed, failed, cancelled, dry_run or no_op.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    pub units_total: usize,
    pub units_completed: usize,
    pub units_failed: usize,
    pub units_cancelled: usize,

    /// Rows updated across all units.
    pub rows_written: u64,

    /// Values sent through the provider across all units.
    pub values_encrypted: u64,

    /// Tables that failed.
    pub failed_tables: Vec<String>,

    pub units: Vec<UnitResult>,
}

impl MigrationResult {
    fn build(
        run_id: String,
        started_at: DateTime<Utc>,
        start: Instant,
        dry_run: bool,
        mut units: Vec<UnitResult>,
    ) -> Self {
        units.sort_by(|a, b| a.table.cmp(&b.table));
        let count = |s: UnitStatus| units.iter().filter(|u| u.status == s).count();
        let units_failed = count(UnitStatus::Failed);
        let units_cancelled = count(UnitStatus::Cancelled);

        let status = if units.is_empty() {
            "no_op"
        } else if units_failed > 0 {
            "failed"
        } else if units_cancelled > 0 {
            "cancelled"
        } else if dry_run {
            "dry_run"
        } else {
            "completed"
        };

        Self {
            run_id,
            status: status.to_string(),
            duration_seconds: start.elapsed().as_secs_f64(),
            started_at,
            completed_at: Utc::now(),
            units_total: units.len(),
            units_completed: count(UnitStatus::Completed),
            units_failed,
            units_cancelled,
            rows_written: units.iter().map(|u| u.rows_written).sum(),
            values_encrypted: units.iter().map(|u| u.stats.values_encrypted).sum(),
            failed_tables: units
                .iter()
                .filter(|u| u.status == UnitStatus::Failed)
                .map(|u| u.table.clone())
                .collect(),
            units,
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether every unit finished (or there was nothing to do).
    pub fn is_success(&self) -> bool {
        self.units_failed == 0 && self.units_cancelled == 0
    }

    /// Process exit code for the run: the first failed unit's code, then
    /// cancellation, then success.
    pub fn exit_code(&self) -> u8 {
        if let Some(failed) = self.units.iter().find(|u| u.status == UnitStatus::Failed) {
            return failed.exit_code.unwrap_or(EXIT_PROCESSING_ERROR);
        }
        if self.units_cancelled > 0 {
            return EXIT_CANCELLED;
        }
        0
    }
}

/// Everything a worker needs to migrate one unit.
struct UnitRunner {
    schema: String,
    chunk_size: usize,
    fetch_size: usize,
    backends: Backends,
    backup: BackupColumnManager,
    transform: EncryptionTransform,
    writer: ChunkedRecordWriter,
}

impl UnitRunner {
    async fn run(&self, plan: UnitPlan, cancel: CancellationToken) -> UnitResult {
        let start = Instant::now();
        let mut result = UnitResult::new(&plan);
        info!(
            "{}: starting ({} columns)",
            plan.table_name,
            plan.target_columns.len()
        );

        match self.migrate(&plan, &cancel, &mut result).await {
            Ok(()) => match self.backends.store.mark_complete(&plan.table_name).await {
                Ok(updated) => {
                    if updated == 0 {
                        warn!("{}: no configuration row to mark COMPLETE", plan.table_name);
                    }
                    result.status = UnitStatus::Completed;
                    info!(
                        "{}: completed ({} rows written, {} values encrypted, {} already encrypted)",
                        plan.table_name,
                        result.rows_written,
                        result.stats.values_encrypted,
                        result.stats.values_already_encrypted
                    );
                }
                Err(e) => {
                    error!("{}: rows migrated but status update failed - {}", plan.table_name, e);
                    result.fail(&e);
                }
            },
            Err(MigrateError::Cancelled) => {
                info!(
                    "{}: cancelled after {} chunks; status left unchanged",
                    plan.table_name, result.chunks
                );
                result.status = UnitStatus::Cancelled;
            }
            Err(e) => {
                error!("{}: failed - {}", plan.table_name, e);
                result.fail(&e);
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result
    }

    async fn migrate(
        &self,
        plan: &UnitPlan,
        cancel: &CancellationToken,
        result: &mut UnitResult,
    ) -> Result<()> {
        let unit = resolve_unit(self.backends.catalog.as_ref(), &self.schema, plan).await?;
        result.pk_columns = unit.pk_names();

        let report = self.backup.ensure_backup_columns(&unit).await?;
        result.backup_columns_created = report.created();

        let mut cursor = self.backends.source.open(&unit, self.fetch_size).await?;
        let pumped = self.pump(&unit, cursor.as_mut(), cancel, result).await;
        let closed = cursor.close().await;
        pumped?;
        closed
    }

    async fn pump(
        &self,
        unit: &MigrationUnit,
        cursor: &mut dyn RecordCursor,
        cancel: &CancellationToken,
        result: &mut UnitResult,
    ) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let chunk = cursor.next_chunk(self.chunk_size).await?;
            if chunk.is_empty() {
                return Ok(());
            }

            let (batch, stats) = self.transform.apply_chunk(chunk)?;
            let outcome = self.writer.write(unit, &batch).await?;
            debug!(
                "{}: chunk {} read {} wrote {} ({})",
                unit.full_name(),
                result.chunks + 1,
                stats.records_read,
                outcome.rows_written,
                outcome.strategy.map(|s| s.name()).unwrap_or("skipped")
            );
            result.absorb(stats, outcome);
        }
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    backends: Backends,
    provider: Option<Arc<dyn EncryptionProvider>>,
}

impl Orchestrator {
    /// Connect to PostgreSQL and build the PostgreSQL backends.
    pub async fn new(config: Config) -> Result<Self> {
        let pool = postgres::connect(&config.database).await?;
        let backends =
            Backends::postgres(pool, &config.database.schema, &config.migration.config_table)?;
        Ok(Self::from_parts(config, backends))
    }

    /// Build over arbitrary backends.
    pub fn from_parts(config: Config, backends: Backends) -> Self {
        Self {
            config,
            backends,
            provider: None,
        }
    }

    /// Set the encryption provider. Required by non-dry runs.
    pub fn with_provider(mut self, provider: Arc<dyn EncryptionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Create the configuration relation if it does not exist.
    pub async fn init_config_table(&self) -> Result<()> {
        self.backends.store.init_schema().await
    }

    /// Every configuration row with its status.
    pub async fn status(&self) -> Result<Vec<MigrationConfig>> {
        self.backends.store.load_all().await
    }

    /// Run the migration.
    ///
    /// Unit failures are reported in the result, not as an error; only failures
    /// before any unit starts (loading configuration) return `Err`.
    pub async fn run(&self, cancel: CancellationToken, dry_run: bool) -> Result<MigrationResult> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        info!("Starting migration run: {}", run_id);

        let configs = self.backends.store.load_active().await?;
        let plans = plan_units(&configs, &self.config.migration.tables);
        if plans.is_empty() {
            info!("No active migration configuration; nothing to do");
            return Ok(MigrationResult::build(run_id, started_at, start, dry_run, Vec::new()));
        }
        info!("Found {} tables to migrate", plans.len());

        let units = if dry_run {
            self.plan_only(plans).await
        } else {
            self.migrate_units(plans, cancel).await?
        };

        let result = MigrationResult::build(run_id, started_at, start, dry_run, units);
        info!(
            "Migration {}: {}/{} tables, {} rows written, {} values encrypted in {:.1}s",
            result.status,
            result.units_completed,
            result.units_total,
            result.rows_written,
            result.values_encrypted,
            result.duration_seconds
        );
        Ok(result)
    }

    async fn plan_only(&self, plans: Vec<UnitPlan>) -> Vec<UnitResult> {
        let mut results = Vec::with_capacity(plans.len());
        for plan in plans {
            let mut result = UnitResult::new(&plan);
            match resolve_unit(
                self.backends.catalog.as_ref(),
                &self.config.database.schema,
                &plan,
            )
            .await
            {
                Ok(unit) => {
                    info!(
                        "[dry run] {}: key ({}), columns ({}), backups ({})",
                        unit.full_name(),
                        unit.pk_names().join(", "),
                        unit.target_columns.join(", "),
                        unit.backup_columns().join(", ")
                    );
                    result.pk_columns = unit.pk_names();
                    result.status = UnitStatus::Planned;
                }
                Err(e) => {
                    warn!("[dry run] {}: {}", plan.table_name, e);
                    result.fail(&e);
                }
            }
            results.push(result);
        }
        results
    }

    async fn migrate_units(
        &self,
        plans: Vec<UnitPlan>,
        cancel: CancellationToken,
    ) -> Result<Vec<UnitResult>> {
        let provider = self.provider.clone().ok_or_else(|| {
            MigrateError::Config("no encryption provider configured".to_string())
        })?;

        let workers = self.config.migration.workers;
        let semaphore = Arc::new(Semaphore::new(workers));
        let runner = Arc::new(UnitRunner {
            schema: self.config.database.schema.clone(),
            chunk_size: self.config.migration.chunk_size,
            fetch_size: self.config.migration.fetch_size,
            backends: self.backends.clone(),
            backup: BackupColumnManager::new(
                self.backends.catalog.clone(),
                self.backends.editor.clone(),
            ),
            transform: EncryptionTransform::new(provider),
            writer: ChunkedRecordWriter::new(self.backends.executor.clone()),
        });

        info!("Migrating {} tables with {} workers", plans.len(), workers);

        let mut results = Vec::with_capacity(plans.len());
        let mut handles = Vec::new();
        for plan in plans {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation requested, not starting {}", plan.table_name);
                    results.push(UnitResult::cancelled(&plan));
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|e| MigrateError::pool(e, "acquiring worker slot"))?
                }
            };

            let runner = runner.clone();
            let cancel = cancel.clone();
            let table = plan.table_name.clone();
            let handle = tokio::spawn(async move {
                let result = runner.run(plan, cancel).await;
                drop(permit);
                result
            });
            handles.push((table, handle));
        }

        for (table, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("{}: task panicked - {}", table, e);
                    let mut result = UnitResult::new(&UnitPlan {
                        table_name: table,
                        target_columns: Vec::new(),
                    });
                    result.error = Some(format!("task panicked: {}", e));
                    result.exit_code = Some(EXIT_PROCESSING_ERROR);
                    results.push(result);
                }
            }
        }

        Ok(results)
    }
}
