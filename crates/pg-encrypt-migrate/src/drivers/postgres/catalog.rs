//! Catalog queries and backup column DDL.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::debug;

use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::{Catalog, SchemaEditor};
use crate::error::{MigrateError, Result, StatementFailure};

const PRIMARY_KEY_QUERY: &str = r#"
    SELECT a.attname
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
    WHERE n.nspname = $1
      AND t.relname = $2
      AND c.contype = 'p'
      AND a.attnum = ANY(c.conkey)
      AND a.attnum > 0
      AND NOT a.attisdropped
    ORDER BY array_position(c.conkey, a.attnum)
"#;

const COLUMN_TYPE_QUERY: &str = r#"
    SELECT pg_catalog.format_type(a.atttypid, a.atttypmod)
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class t ON t.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    WHERE n.nspname = $1
      AND t.relname = $2
      AND a.attname = $3
      AND a.attnum > 0
      AND NOT a.attisdropped
"#;

// pg_attribute lists every column regardless of the role's column privileges,
// unlike information_schema.columns.
const COLUMN_EXISTS_QUERY: &str = r#"
    SELECT EXISTS (
        SELECT 1
        FROM pg_catalog.pg_attribute a
        JOIN pg_catalog.pg_class t ON t.oid = a.attrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $1
          AND t.relname = $2
          AND a.attname = $3
          AND a.attnum > 0
          AND NOT a.attisdropped
    )
"#;

/// Catalog access and DDL over auto-committing pooled sessions.
#[derive(Clone)]
pub struct PgCatalog {
    pool: Pool,
}

impl PgCatalog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn primary_key_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "loading primary key"))?;
        let rows = client.query(PRIMARY_KEY_QUERY, &[&schema, &table]).await?;
        let columns: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
        debug!("Primary key for {}.{}: {:?}", schema, table, columns);
        Ok(columns)
    }

    async fn column_type(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<String>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "loading column type"))?;
        let row = client
            .query_opt(COLUMN_TYPE_QUERY, &[&schema, &table, &column])
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn column_exists(&self, schema: &str, table: &str, column: &str) -> Result<bool> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "checking column existence"))?;
        let row = client
            .query_one(COLUMN_EXISTS_QUERY, &[&schema, &table, &column])
            .await?;
        Ok(row.get(0))
    }
}

/// `ALTER TABLE .. ADD COLUMN` statement text.
pub(crate) fn add_column_sql(
    schema: &str,
    table: &str,
    column: &str,
    declared_type: &str,
) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        qualify_pg(schema, table)?,
        quote_pg(column)?,
        declared_type
    ))
}

#[async_trait]
impl SchemaEditor for PgCatalog {
    async fn add_column(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        declared_type: &str,
    ) -> std::result::Result<(), StatementFailure> {
        let sql = add_column_sql(schema, table, column, declared_type)
            .map_err(StatementFailure::other)?;
        let client = self.pool.get().await.map_err(StatementFailure::other)?;
        debug!("{}", sql);
        client.batch_execute(&sql).await?;
        Ok(())
    }
}
