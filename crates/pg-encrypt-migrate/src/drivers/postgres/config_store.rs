//! The `migration_config` relation.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::{debug, info};

use crate::core::identifier::qualify_pg;
use crate::core::{ConfigStatus, ConfigStore, MigrationConfig};
use crate::error::{MigrateError, Result};

/// Configuration rows stored in `<schema>.<config_table>`.
#[derive(Clone)]
pub struct PgConfigStore {
    pool: Pool,
    table: String,
}

impl PgConfigStore {
    /// Store over `<schema>.<table>`.
    pub fn new(pool: Pool, schema: &str, table: &str) -> Result<Self> {
        Ok(Self {
            pool,
            table: qualify_pg(schema, table)?,
        })
    }

    async fn load(&self, only_active: bool) -> Result<Vec<MigrationConfig>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "loading migration config"))?;
        let filter = if only_active {
            "WHERE status IS NULL OR upper(trim(status)) = 'ACTIVE'"
        } else {
            ""
        };
        let sql = format!(
            "SELECT target_table_name, target_column_name, status FROM {} {} ORDER BY target_table_name",
            self.table, filter
        );
        let rows = client.query(sql.as_str(), &[]).await?;

        let mut configs = Vec::with_capacity(rows.len());
        for row in rows {
            let table: Option<String> = row.try_get(0)?;
            let columns: Option<String> = row.try_get(1)?;
            let status: Option<String> = row.try_get(2)?;
            match (table, columns) {
                (Some(table), Some(columns)) if !table.trim().is_empty() => {
                    configs.push(MigrationConfig::from_row(&table, &columns, status.as_deref()));
                }
                (table, _) => debug!("Skipping incomplete config row for {:?}", table),
            }
        }
        Ok(configs)
    }
}

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn init_schema(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "creating migration config table"))?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                target_table_name TEXT PRIMARY KEY, \
                target_column_name TEXT NOT NULL, \
                status TEXT DEFAULT 'ACTIVE' \
                    CHECK (status IN ('ACTIVE', 'COMPLETE', 'INACTIVE')))",
            self.table
        );
        client.batch_execute(&sql).await?;
        info!("Ensured configuration table {}", self.table);
        Ok(())
    }

    async fn load_active(&self) -> Result<Vec<MigrationConfig>> {
        self.load(true).await
    }

    async fn load_all(&self) -> Result<Vec<MigrationConfig>> {
        self.load(false).await
    }

    async fn mark_complete(&self, table: &str) -> Result<u64> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "updating migration status"))?;
        let sql = format!(
            "UPDATE {} SET status = $1 WHERE target_table_name = $2",
            self.table
        );
        let updated = client
            .execute(sql.as_str(), &[&ConfigStatus::Complete.as_str(), &table])
            .await?;
        Ok(updated)
    }
}
