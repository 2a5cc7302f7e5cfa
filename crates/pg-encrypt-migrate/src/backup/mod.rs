//! Backup column lifecycle.
//!
//! Every target column gets a shadow column named `lowercase(column) + "_bak"`
//! with exactly the same declared type. The column is added at most once;
//! concurrent or repeated attempts that hit "column already exists" are treated
//! as success. DDL runs auto-committed, before any row transaction of the unit.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::identifier::validate_type_name;
use crate::core::{BackupColumnSpec, Catalog, MigrationUnit, SchemaEditor};
use crate::error::{MigrateError, Result, StatementFailure};

/// SQLSTATE for `duplicate_column`.
const DUPLICATE_COLUMN: &str = "42701";

/// What `ensure_backup_columns` did for one backup column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupAction {
    /// Column was added by this call.
    Created,
    /// Column already existed.
    AlreadyPresent,
    /// `ADD COLUMN` raced with another session and lost.
    CreatedConcurrently,
}

/// Per-unit backup column report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupReport {
    /// One entry per target column, in configured order.
    pub columns: Vec<(BackupColumnSpec, BackupAction)>,
}

impl BackupReport {
    /// Number of columns added by this run.
    pub fn created(&self) -> usize {
        self.columns
            .iter()
            .filter(|(_, a)| *a == BackupAction::Created)
            .count()
    }
}

/// Whether a DDL failure means the column is already there.
pub fn is_duplicate_column_error(failure: &StatementFailure) -> bool {
    if failure.code.as_deref() == Some(DUPLICATE_COLUMN) {
        return true;
    }
    let message = failure.message.to_lowercase();
    message.contains("already exists") || message.contains("duplicate column")
}

/// Ensures backup columns exist for a unit's target columns.
pub struct BackupColumnManager {
    catalog: Arc<dyn Catalog>,
    editor: Arc<dyn SchemaEditor>,
}

impl BackupColumnManager {
    /// Create a manager over the given catalog and DDL session.
    pub fn new(catalog: Arc<dyn Catalog>, editor: Arc<dyn SchemaEditor>) -> Self {
        Self { catalog, editor }
    }

    /// Add any missing backup column, reusing each source column's declared type.
    ///
    /// Fails the unit on the first column whose source is missing or whose DDL
    /// fails for a reason other than a duplicate column.
    pub async fn ensure_backup_columns(&self, unit: &MigrationUnit) -> Result<BackupReport> {
        let mut report = BackupReport::default();

        for column in &unit.target_columns {
            let declared_type = self
                .catalog
                .column_type(&unit.schema, &unit.table_name, column)
                .await?
                .ok_or_else(|| {
                    MigrateError::schema(
                        &unit.table_name,
                        format!("target column {} does not exist", column),
                    )
                })?;
            let spec = BackupColumnSpec::new(&unit.table_name, column, &declared_type);

            if self
                .catalog
                .column_exists(&unit.schema, &unit.table_name, &spec.backup_column)
                .await?
            {
                debug!(
                    "{}: backup column {} already present",
                    unit.full_name(),
                    spec.backup_column
                );
                report.columns.push((spec, BackupAction::AlreadyPresent));
                continue;
            }

            validate_type_name(&spec.declared_type)?;

            let action = match self
                .editor
                .add_column(
                    &unit.schema,
                    &unit.table_name,
                    &spec.backup_column,
                    &spec.declared_type,
                )
                .await
            {
                Ok(()) => {
                    info!(
                        "{}: added backup column {} {}",
                        unit.full_name(),
                        spec.backup_column,
                        spec.declared_type
                    );
                    BackupAction::Created
                }
                Err(failure) if is_duplicate_column_error(&failure) => {
                    warn!(
                        "{}: backup column {} was added concurrently: {}",
                        unit.full_name(),
                        spec.backup_column,
                        failure
                    );
                    BackupAction::CreatedConcurrently
                }
                Err(failure) => {
                    return Err(MigrateError::ddl(
                        &unit.table_name,
                        &spec.backup_column,
                        failure,
                    ));
                }
            };
            report.columns.push((spec, action));
        }

        Ok(report)
    }
}
