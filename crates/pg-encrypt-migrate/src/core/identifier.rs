//! Centralized identifier validation and quoting for SQL injection prevention.
//!
//! Table, column and schema names come from the configuration relation and are
//! spliced into dynamic SQL (identifiers cannot be bound as parameters), so every
//! name goes through [`validate_identifier`] and [`quote_pg`] first. Declared column
//! types are spliced too and are checked with [`validate_type_name`].

use crate::error::{MigrateError, Result};

/// Maximum identifier length. PostgreSQL truncates at 63 bytes; anything longer
/// would silently address a different column.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and identifiers
/// exceeding PostgreSQL's maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
/// Validates the identifier before quoting.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Validate a declared type as rendered by `format_type()` before it is used in
/// `ADD COLUMN` or a cast.
///
/// Only characters that appear in PostgreSQL type names are allowed: letters,
/// digits, spaces, underscores, parentheses, commas, brackets, dots and quotes.
pub fn validate_type_name(type_name: &str) -> Result<()> {
    let trimmed = type_name.trim();
    if trimmed.is_empty() {
        return Err(MigrateError::Config("Type name cannot be empty".to_string()));
    }
    if trimmed.contains("--") || trimmed.contains(';') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Type name contains statement or comment markers: {:?}",
            type_name
        )));
    }
    let allowed = |c: char| {
        c.is_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ',' | '[' | ']' | '.' | '"')
    };
    if !trimmed.chars().all(allowed) {
        return Err(MigrateError::Config(format!(
            "SECURITY: Type name contains unexpected characters: {:?}",
            type_name
        )));
    }
    Ok(())
}
