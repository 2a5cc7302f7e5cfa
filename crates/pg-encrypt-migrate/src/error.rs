//! Error types for the column encryption migration library.

use thiserror::Error;

/// Exit code for configuration errors (bad YAML, missing fields, bad CLI input).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for schema and DDL errors (no primary key, missing column, ADD COLUMN failure).
pub const EXIT_SCHEMA_ERROR: u8 = 2;
/// Exit code for row processing errors (provider failure, exhausted write strategies).
pub const EXIT_PROCESSING_ERROR: u8 = 3;
/// Exit code for connection and query errors.
pub const EXIT_DATABASE_ERROR: u8 = 4;
/// Exit code for a run stopped by SIGINT/SIGTERM.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog precondition failed: no primary key, or a configured column is missing.
    #[error("Schema error for table {table}: {message}")]
    Schema { table: String, message: String },

    /// Backup column creation failed for a reason other than "already exists".
    #[error("DDL failed for {table}.{column}: {message}")]
    Ddl {
        table: String,
        column: String,
        message: String,
    },

    /// The encryption provider rejected a value.
    #[error("Encryption failed for {table}.{column} (pk {pk}): {message}")]
    Transform {
        table: String,
        column: String,
        pk: String,
        message: String,
    },

    /// Every write strategy failed for a chunk.
    #[error("Write failed for table {table} after {attempts} strategies: {message}")]
    Write {
        table: String,
        attempts: usize,
        message: String,
    },

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Schema error
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a DDL error
    pub fn ddl(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        MigrateError::Ddl {
            table: table.into(),
            column: column.into(),
            message: message.to_string(),
        }
    }

    /// Map the error to a process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Schema { .. } | MigrateError::Ddl { .. } => EXIT_SCHEMA_ERROR,
            MigrateError::Transform { .. } | MigrateError::Write { .. } => EXIT_PROCESSING_ERROR,
            MigrateError::Database(_) | MigrateError::Pool { .. } => EXIT_DATABASE_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Whether the error aborted a unit before any row was touched.
    pub fn is_precondition(&self) -> bool {
        matches!(self, MigrateError::Schema { .. } | MigrateError::Ddl { .. })
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Failure reported by an encryption provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProviderError(pub String);

/// A failed statement with its SQLSTATE, when the server reported one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StatementFailure {
    /// Five-character SQLSTATE code.
    pub code: Option<String>,
    /// Server or client message.
    pub message: String,
}

impl StatementFailure {
    /// Failure without a SQLSTATE (connection or pool level).
    pub fn other(message: impl std::fmt::Display) -> Self {
        Self {
            code: None,
            message: message.to_string(),
        }
    }
}

impl From<tokio_postgres::Error> for StatementFailure {
    fn from(e: tokio_postgres::Error) -> Self {
        let message = match e.as_db_error() {
            Some(db) => db.message().to_string(),
            None => e.to_string(),
        };
        Self {
            code: e.code().map(|c| c.code().to_string()),
            message,
        }
    }
}
