//! In-memory implementations of the core traits for unit tests.
//!
//! [`MemoryDatabase`] behaves like a single-schema PostgreSQL database for the
//! operations the engine uses: catalog lookups, `ADD COLUMN`, snapshot cursors,
//! transactional batch updates matched on the full primary key, and the
//! configuration relation. Failures can be injected per write strategy.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::core::{
    backup_column_name, Catalog, ChunkExecutor, ConfigStatus, ConfigStore, EncryptionProvider,
    MigrationConfig, MigrationUnit, PkColumn, RecordCursor, RecordLayout, RecordSource,
    SchemaEditor, TargetRecord, WriteStrategy,
};
use crate::error::{MigrateError, ProviderError, Result, StatementFailure};

type Row = Vec<Option<String>>;

/// A table: ordered columns, primary key and rows stored in column order.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    columns: Vec<(String, String)>,
    pk: Vec<String>,
    rows: Vec<Row>,
}

impl MemoryTable {
    /// Table whose leading columns form the primary key. Pass an empty slice for
    /// a table without a primary key.
    pub fn new(name: &str, pk: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            columns: pk
                .iter()
                .map(|(n, t)| (n.to_string(), t.to_string()))
                .collect(),
            pk: pk.iter().map(|(n, _)| n.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a column; existing rows get NULL.
    pub fn column(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push((name.to_string(), data_type.to_string()));
        for row in &mut self.rows {
            row.push(None);
        }
        self
    }

    /// Append a row, values in column order.
    pub fn row(mut self, values: &[Option<&str>]) -> Self {
        let mut row: Row = values.iter().map(|v| v.map(String::from)).collect();
        row.resize(self.columns.len(), None);
        self.rows.push(row);
        self
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _)| n == column)
    }

    fn find_row(&self, pk_values: &[String]) -> Option<usize> {
        let pk_idx: Vec<usize> = self.pk.iter().filter_map(|c| self.index_of(c)).collect();
        self.rows.iter().position(|row| {
            pk_idx
                .iter()
                .zip(pk_values)
                .all(|(&i, v)| row[i].as_deref() == Some(v.as_str()))
        })
    }
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, MemoryTable>,
    configs: Vec<MigrationConfig>,
    ddl_count: usize,
    add_column_failure: Option<StatementFailure>,
    failing: HashSet<WriteStrategy>,
    attempts: Vec<WriteStrategy>,
    committed_batches: usize,
    fail_writes_after: Option<usize>,
    cursors_opened: usize,
    cursors_closed: usize,
    max_fetch_size: usize,
    config_schema_created: bool,
}

/// In-memory database implementing every database trait.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, table: MemoryTable) {
        lock(&self.state).tables.insert(table.name.clone(), table);
    }

    pub fn add_config(&self, table: &str, columns: &str, status: Option<&str>) {
        lock(&self.state)
            .configs
            .push(MigrationConfig::from_row(table, columns, status));
    }

    pub fn config_status(&self, table: &str) -> Option<ConfigStatus> {
        lock(&self.state)
            .configs
            .iter()
            .find(|c| c.table_name == table)
            .and_then(|c| c.status)
    }

    pub fn set_config_status(&self, table: &str, status: ConfigStatus) {
        for config in lock(&self.state).configs.iter_mut() {
            if config.table_name == table {
                config.status = Some(status);
            }
        }
    }

    /// Resolve a unit the way the orchestrator does, without going through the traits.
    pub fn unit(&self, table: &str, columns: &[&str]) -> MigrationUnit {
        let state = lock(&self.state);
        let pk_columns: Vec<PkColumn> = state
            .tables
            .get(table)
            .map(|t| {
                t.pk.iter()
                    .map(|name| PkColumn {
                        name: name.clone(),
                        data_type: t
                            .index_of(name)
                            .map(|i| t.columns[i].1.clone())
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        MigrationUnit {
            schema: "public".to_string(),
            table_name: table.to_string(),
            target_columns: columns.iter().map(|c| c.to_string()).collect(),
            pk_columns,
        }
    }

    pub fn column_type_of(&self, table: &str, column: &str) -> Option<String> {
        let state = lock(&self.state);
        let t = state.tables.get(table)?;
        t.index_of(column).map(|i| t.columns[i].1.clone())
    }

    pub fn column_count(&self, table: &str) -> usize {
        lock(&self.state)
            .tables
            .get(table)
            .map(|t| t.columns.len())
            .unwrap_or(0)
    }

    pub fn ddl_count(&self) -> usize {
        lock(&self.state).ddl_count
    }

    /// Make every `ADD COLUMN` fail with this error.
    pub fn fail_add_column(&self, failure: StatementFailure) {
        lock(&self.state).add_column_failure = Some(failure);
    }

    /// Make every attempt with this strategy fail.
    pub fn fail_strategy(&self, strategy: WriteStrategy) {
        lock(&self.state).failing.insert(strategy);
    }

    /// Make every write attempt fail once `n` batches have been committed.
    pub fn fail_writes_after(&self, n: usize) {
        lock(&self.state).fail_writes_after = Some(n);
    }

    /// Clear injected write failures.
    pub fn heal_writes(&self) {
        let mut state = lock(&self.state);
        state.failing.clear();
        state.fail_writes_after = None;
    }

    pub fn attempted_strategies(&self) -> Vec<WriteStrategy> {
        lock(&self.state).attempts.clone()
    }

    pub fn committed_batches(&self) -> usize {
        lock(&self.state).committed_batches
    }

    pub fn open_cursors(&self) -> usize {
        let state = lock(&self.state);
        state.cursors_opened - state.cursors_closed
    }

    pub fn cursors_opened(&self) -> usize {
        lock(&self.state).cursors_opened
    }

    pub fn max_fetch_size(&self) -> usize {
        lock(&self.state).max_fetch_size
    }

    pub fn config_schema_created(&self) -> bool {
        lock(&self.state).config_schema_created
    }

    /// Value of one cell, addressed by the full primary key.
    pub fn value(&self, table: &str, pk: &[&str], column: &str) -> Option<String> {
        let state = lock(&self.state);
        let t = state.tables.get(table)?;
        let pk: Vec<String> = pk.iter().map(|v| v.to_string()).collect();
        let row = t.find_row(&pk)?;
        let col = t.index_of(column)?;
        t.rows[row][col].clone()
    }

    /// Every row of a table as column-name keyed maps.
    pub fn dump(&self, table: &str) -> Vec<BTreeMap<String, Option<String>>> {
        let state = lock(&self.state);
        state
            .tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|row| {
                        t.columns
                            .iter()
                            .map(|(n, _)| n.clone())
                            .zip(row.iter().cloned())
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Records for every row of the unit's table, untransformed.
    pub fn snapshot_records(&self, unit: &MigrationUnit) -> Vec<TargetRecord> {
        let layout = RecordLayout::for_unit(unit);
        self.project(unit)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(pk, values)| TargetRecord::new(layout.clone(), pk, values).ok())
            .collect()
    }

    fn project(&self, unit: &MigrationUnit) -> Result<Vec<(Row, Row)>> {
        let state = lock(&self.state);
        let t = state.tables.get(&unit.table_name).ok_or_else(|| {
            MigrateError::schema(&unit.table_name, "relation does not exist")
        })?;
        let index = |c: &str| {
            t.index_of(c).ok_or_else(|| {
                MigrateError::schema(&unit.table_name, format!("column {} does not exist", c))
            })
        };
        let pk_idx = unit
            .pk_columns
            .iter()
            .map(|c| index(&c.name))
            .collect::<Result<Vec<_>>>()?;
        let target_idx = unit
            .target_columns
            .iter()
            .map(|c| index(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(t.rows
            .iter()
            .map(|row| {
                (
                    pk_idx.iter().map(|&i| row[i].clone()).collect(),
                    target_idx.iter().map(|&i| row[i].clone()).collect(),
                )
            })
            .collect())
    }
}

#[async_trait]
impl Catalog for MemoryDatabase {
    async fn primary_key_columns(&self, _schema: &str, table: &str) -> Result<Vec<String>> {
        Ok(lock(&self.state)
            .tables
            .get(table)
            .map(|t| t.pk.clone())
            .unwrap_or_default())
    }

    async fn column_type(
        &self,
        _schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<String>> {
        Ok(self.column_type_of(table, column))
    }

    async fn column_exists(&self, _schema: &str, table: &str, column: &str) -> Result<bool> {
        Ok(self.column_type_of(table, column).is_some())
    }
}

#[async_trait]
impl SchemaEditor for MemoryDatabase {
    async fn add_column(
        &self,
        _schema: &str,
        table: &str,
        column: &str,
        declared_type: &str,
    ) -> std::result::Result<(), StatementFailure> {
        let mut state = lock(&self.state);
        if let Some(failure) = state.add_column_failure.clone() {
            return Err(failure);
        }
        let t = state.tables.get_mut(table).ok_or_else(|| StatementFailure {
            code: Some("42P01".to_string()),
            message: format!("relation \"{}\" does not exist", table),
        })?;
        if t.index_of(column).is_some() {
            return Err(StatementFailure {
                code: Some("42701".to_string()),
                message: format!(
                    "column \"{}\" of relation \"{}\" already exists",
                    column, table
                ),
            });
        }
        t.columns.push((column.to_string(), declared_type.to_string()));
        for row in &mut t.rows {
            row.push(None);
        }
        state.ddl_count += 1;
        Ok(())
    }
}

struct MemoryCursor {
    state: Arc<Mutex<State>>,
    layout: Arc<RecordLayout>,
    rows: VecDeque<(Row, Row)>,
}

#[async_trait]
impl RecordSource for MemoryDatabase {
    async fn open(
        &self,
        unit: &MigrationUnit,
        fetch_size: usize,
    ) -> Result<Box<dyn RecordCursor>> {
        let rows = self.project(unit)?;
        {
            let mut state = lock(&self.state);
            state.cursors_opened += 1;
            state.max_fetch_size = state.max_fetch_size.max(fetch_size);
        }
        Ok(Box::new(MemoryCursor {
            state: self.state.clone(),
            layout: RecordLayout::for_unit(unit),
            rows: rows.into(),
        }))
    }
}

#[async_trait]
impl RecordCursor for MemoryCursor {
    async fn next(&mut self) -> Result<Option<TargetRecord>> {
        match self.rows.pop_front() {
            Some((pk, values)) => Ok(Some(TargetRecord::new(self.layout.clone(), pk, values)?)),
            None => Ok(None),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        lock(&self.state).cursors_closed += 1;
        Ok(())
    }
}

fn write_failure(table: &str, message: impl Into<String>) -> MigrateError {
    MigrateError::Write {
        table: table.to_string(),
        attempts: 1,
        message: message.into(),
    }
}

#[async_trait]
impl ChunkExecutor for MemoryDatabase {
    async fn execute(
        &self,
        unit: &MigrationUnit,
        strategy: WriteStrategy,
        batch: &[TargetRecord],
    ) -> Result<u64> {
        let mut state = lock(&self.state);
        state.attempts.push(strategy);

        if state.failing.contains(&strategy) {
            return Err(write_failure(&unit.table_name, format!("injected {} failure", strategy)));
        }
        if let Some(n) = state.fail_writes_after {
            if state.committed_batches >= n {
                return Err(write_failure(&unit.table_name, "injected write failure"));
            }
        }

        let table = state
            .tables
            .get(&unit.table_name)
            .ok_or_else(|| write_failure(&unit.table_name, "relation does not exist"))?;

        // Work on a copy so a failed attempt leaves nothing behind.
        let mut rows = table.rows.clone();
        let mut written = 0u64;
        for record in batch {
            let Some(row) = table.find_row(record.pk_values()) else {
                continue;
            };
            for (column, original, encrypted) in record.migrated_columns() {
                let target = table.index_of(column).ok_or_else(|| {
                    write_failure(&unit.table_name, format!("column \"{}\" does not exist", column))
                })?;
                rows[row][target] = Some(encrypted.to_string());
                if strategy.writes_backup() {
                    let backup_name = backup_column_name(column);
                    let backup = table.index_of(&backup_name).ok_or_else(|| {
                        write_failure(
                            &unit.table_name,
                            format!("column \"{}\" does not exist", backup_name),
                        )
                    })?;
                    rows[row][backup] = original.map(String::from);
                }
            }
            written += 1;
        }

        if let Some(t) = state.tables.get_mut(&unit.table_name) {
            t.rows = rows;
        }
        state.committed_batches += 1;
        Ok(written)
    }
}

#[async_trait]
impl ConfigStore for MemoryDatabase {
    async fn init_schema(&self) -> Result<()> {
        lock(&self.state).config_schema_created = true;
        Ok(())
    }

    async fn load_active(&self) -> Result<Vec<MigrationConfig>> {
        Ok(lock(&self.state)
            .configs
            .iter()
            .filter(|c| c.is_active())
            .cloned()
            .collect())
    }

    async fn load_all(&self) -> Result<Vec<MigrationConfig>> {
        Ok(lock(&self.state).configs.clone())
    }

    async fn mark_complete(&self, table: &str) -> Result<u64> {
        let mut updated = 0;
        for config in lock(&self.state).configs.iter_mut() {
            if config.table_name == table {
                config.status = Some(ConfigStatus::Complete);
                config.raw_status = None;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

/// Deterministic provider: `x` becomes `ENC[x]`.
#[derive(Default)]
pub struct FakeProvider {
    calls: AtomicUsize,
    fail_on: Option<String>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail when asked to encrypt exactly this value.
    pub fn failing_on(mut self, value: &str) -> Self {
        self.fail_on = Some(value.to_string());
        self
    }

    /// Number of successful `encrypt` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EncryptionProvider for FakeProvider {
    fn encrypt(&self, plaintext: &str) -> std::result::Result<String, ProviderError> {
        if self.fail_on.as_deref() == Some(plaintext) {
            return Err(ProviderError(format!("cannot encrypt {:?}", plaintext)));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ENC[{}]", plaintext))
    }

    fn looks_encrypted(&self, value: &str) -> bool {
        value.starts_with("ENC[") && value.ends_with(']')
    }
}
