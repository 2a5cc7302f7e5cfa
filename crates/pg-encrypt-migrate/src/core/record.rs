//! Transient per-row record flowing from the reader through the transform to the writer.

use std::sync::Arc;

use super::schema::MigrationUnit;
use crate::error::{MigrateError, Result};

/// Column layout shared by every record of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    /// Table name.
    pub table_name: String,
    /// Primary key column names in key order.
    pub pk_columns: Vec<String>,
    /// Target column names in configured order.
    pub target_columns: Vec<String>,
}

impl RecordLayout {
    /// Build the shared layout for a unit.
    pub fn for_unit(unit: &MigrationUnit) -> Arc<Self> {
        Arc::new(Self {
            table_name: unit.table_name.clone(),
            pk_columns: unit.pk_names(),
            target_columns: unit.target_columns.clone(),
        })
    }
}

/// One row of a unit's table.
///
/// `pk_values` is parallel to `layout.pk_columns`, `original_values` and
/// `transformed_values` are parallel to `layout.target_columns`. A `Some` in
/// `transformed_values` means the column is migrated by this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    layout: Arc<RecordLayout>,
    pk_values: Vec<String>,
    original_values: Vec<Option<String>>,
    transformed_values: Vec<Option<String>>,
}

impl TargetRecord {
    /// Build a record from raw column values.
    ///
    /// Fails with a schema error when any primary key value is NULL, since such a
    /// row cannot be addressed by the writer.
    pub fn new(
        layout: Arc<RecordLayout>,
        pk_values: Vec<Option<String>>,
        original_values: Vec<Option<String>>,
    ) -> Result<Self> {
        if pk_values.len() != layout.pk_columns.len()
            || original_values.len() != layout.target_columns.len()
        {
            return Err(MigrateError::schema(
                &layout.table_name,
                format!(
                    "row shape mismatch: expected {} key and {} target values, got {} and {}",
                    layout.pk_columns.len(),
                    layout.target_columns.len(),
                    pk_values.len(),
                    original_values.len()
                ),
            ));
        }

        let mut keys = Vec::with_capacity(pk_values.len());
        for (column, value) in layout.pk_columns.iter().zip(pk_values) {
            match value {
                Some(v) => keys.push(v),
                None => {
                    return Err(MigrateError::schema(
                        &layout.table_name,
                        format!("primary key column {} is NULL", column),
                    ))
                }
            }
        }

        let transformed_values = vec![None; original_values.len()];
        Ok(Self {
            layout,
            pk_values: keys,
            original_values,
            transformed_values,
        })
    }

    /// Shared layout.
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Table name.
    pub fn table_name(&self) -> &str {
        &self.layout.table_name
    }

    /// Primary key values as text, in key order.
    pub fn pk_values(&self) -> &[String] {
        &self.pk_values
    }

    /// Original values, parallel to the target columns.
    pub fn original_values(&self) -> &[Option<String>] {
        &self.original_values
    }

    /// Transformed values, parallel to the target columns.
    pub fn transformed_values(&self) -> &[Option<String>] {
        &self.transformed_values
    }

    /// Original value of a named target column.
    pub fn original(&self, column: &str) -> Option<&str> {
        self.column_index(column)
            .and_then(|i| self.original_values[i].as_deref())
    }

    /// Transformed value of a named target column.
    pub fn transformed(&self, column: &str) -> Option<&str> {
        self.column_index(column)
            .and_then(|i| self.transformed_values[i].as_deref())
    }

    /// Record the migrated value for the target column at `index`.
    pub fn set_transformed(&mut self, index: usize, value: String) {
        if let Some(slot) = self.transformed_values.get_mut(index) {
            *slot = Some(value);
        }
    }

    /// Number of columns migrated by this pass.
    pub fn transformed_count(&self) -> usize {
        self.transformed_values.iter().filter(|v| v.is_some()).count()
    }

    /// Iterate `(column, original, transformed)` for migrated columns only.
    pub fn migrated_columns(&self) -> impl Iterator<Item = (&str, Option<&str>, &str)> {
        self.layout
            .target_columns
            .iter()
            .zip(self.original_values.iter())
            .zip(self.transformed_values.iter())
            .filter_map(|((column, original), transformed)| {
                transformed
                    .as_deref()
                    .map(|t| (column.as_str(), original.as_deref(), t))
            })
    }

    /// Render the key for logs and error messages, e.g. `id=42` or `a=1, b=x`.
    pub fn pk_display(&self) -> String {
        self.layout
            .pk_columns
            .iter()
            .zip(self.pk_values.iter())
            .map(|(c, v)| format!("{}={}", c, v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.layout.target_columns.iter().position(|c| c == column)
    }
}
