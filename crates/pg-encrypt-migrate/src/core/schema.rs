//! Configuration rows, migration units and backup column metadata.

use serde::{Deserialize, Serialize};

/// Suffix appended to a lowercased source column name to form its backup column.
pub const BACKUP_SUFFIX: &str = "_bak";

/// Lifecycle status of a configuration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigStatus {
    /// Waiting to be migrated (or partially migrated by a failed run).
    Active,
    /// Every configured column of the table has been migrated.
    Complete,
    /// Disabled by an operator; never picked up.
    Inactive,
}

impl ConfigStatus {
    /// Value stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStatus::Active => "ACTIVE",
            ConfigStatus::Complete => "COMPLETE",
            ConfigStatus::Inactive => "INACTIVE",
        }
    }

    /// Parse a stored status. Unknown values are treated as `None` so that a
    /// hand-edited row is never silently picked up as active.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(ConfigStatus::Active),
            "COMPLETE" => Some(ConfigStatus::Complete),
            "INACTIVE" => Some(ConfigStatus::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the configuration relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Table to migrate.
    pub table_name: String,

    /// Columns to encrypt, in configured order, trimmed and deduplicated.
    pub target_columns: Vec<String>,

    /// Stored status. A NULL status counts as active.
    pub status: Option<ConfigStatus>,

    /// Raw status text when it did not parse, kept for reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_status: Option<String>,
}

impl MigrationConfig {
    /// Build a configuration row from the stored comma-separated column list.
    pub fn from_row(table_name: &str, column_list: &str, status: Option<&str>) -> Self {
        let parsed = status.and_then(ConfigStatus::parse);
        let raw_status = match (status, parsed) {
            (Some(raw), None) => Some(raw.to_string()),
            _ => None,
        };
        Self {
            table_name: table_name.trim().to_string(),
            target_columns: parse_column_list(column_list),
            status: parsed,
            raw_status,
        }
    }

    /// Whether the engine should pick this row up.
    pub fn is_active(&self) -> bool {
        match self.status {
            Some(ConfigStatus::Active) => true,
            None => self.raw_status.is_none(),
            _ => false,
        }
    }
}

/// Split a comma-separated column list, trimming blanks and dropping duplicates.
pub fn parse_column_list(raw: &str) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for column in raw.split(',') {
        let column = column.trim();
        if !column.is_empty() && !columns.iter().any(|c| c == column) {
            columns.push(column.to_string());
        }
    }
    columns
}

/// Name of the backup column for a source column.
pub fn backup_column_name(source_column: &str) -> String {
    format!("{}{}", source_column.to_lowercase(), BACKUP_SUFFIX)
}

/// A primary key column and its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkColumn {
    /// Column name.
    pub name: String,
    /// Declared type as rendered by the catalog, e.g. `bigint`.
    pub data_type: String,
}

/// The complete, independent migration of one table's configured columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationUnit {
    /// Schema holding the table.
    pub schema: String,

    /// Table name.
    pub table_name: String,

    /// Columns to encrypt, merged from every config row for this table.
    pub target_columns: Vec<String>,

    /// Primary key columns in key order. Never empty.
    pub pk_columns: Vec<PkColumn>,
}

impl MigrationUnit {
    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.table_name)
    }

    /// Primary key column names in key order.
    pub fn pk_names(&self) -> Vec<String> {
        self.pk_columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Backup column names, parallel to `target_columns`.
    pub fn backup_columns(&self) -> Vec<String> {
        self.target_columns
            .iter()
            .map(|c| backup_column_name(c))
            .collect()
    }
}

/// A shadow column preserving the pre-migration value of a target column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupColumnSpec {
    /// Table name.
    pub table: String,
    /// Column being encrypted.
    pub source_column: String,
    /// `lowercase(source_column) + "_bak"`.
    pub backup_column: String,
    /// Declared type of the source column, reused verbatim for the backup.
    pub declared_type: String,
}

impl BackupColumnSpec {
    /// Build the spec for a source column of the given declared type.
    pub fn new(table: &str, source_column: &str, declared_type: &str) -> Self {
        Self {
            table: table.to_string(),
            source_column: source_column.to_string(),
            backup_column: backup_column_name(source_column),
            declared_type: declared_type.to_string(),
        }
    }
}
