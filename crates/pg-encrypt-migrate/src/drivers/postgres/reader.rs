//! Server-side cursor reader.
//!
//! Each cursor owns one pooled session for its lifetime. The session runs
//! `BEGIN READ ONLY` and declares a `NO SCROLL` cursor selecting the key and
//! target columns cast to text; rows are pulled with `FETCH FORWARD n`, so at
//! most one fetch worth of rows is resident.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tokio_postgres::Row;
use tracing::{debug, warn};

use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::{MigrationUnit, RecordCursor, RecordLayout, RecordSource, TargetRecord};
use crate::error::{MigrateError, Result};

const CURSOR_NAME: &str = "pg_encrypt_migrate_cursor";

/// Opens cursors on pooled sessions.
#[derive(Clone)]
pub struct PgRecordSource {
    pool: Pool,
}

impl PgRecordSource {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

/// `SELECT` behind the cursor: key columns then target columns, all as text.
pub(crate) fn cursor_select_sql(unit: &MigrationUnit) -> Result<String> {
    let mut columns = Vec::with_capacity(unit.pk_columns.len() + unit.target_columns.len());
    for pk in &unit.pk_columns {
        columns.push(format!("{}::text", quote_pg(&pk.name)?));
    }
    for column in &unit.target_columns {
        columns.push(format!("{}::text", quote_pg(column)?));
    }
    Ok(format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        qualify_pg(&unit.schema, &unit.table_name)?
    ))
}

#[async_trait]
impl RecordSource for PgRecordSource {
    async fn open(
        &self,
        unit: &MigrationUnit,
        fetch_size: usize,
    ) -> Result<Box<dyn RecordCursor>> {
        let select = cursor_select_sql(unit)?;
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting reader session"))?;

        let declare = format!(
            "BEGIN READ ONLY; DECLARE {} NO SCROLL CURSOR FOR {}",
            CURSOR_NAME, select
        );
        if let Err(e) = client.batch_execute(&declare).await {
            // The session is inside a failed transaction; do not return it to the pool.
            drop(Object::take(client));
            return Err(e.into());
        }
        debug!("{}: cursor opened (fetch size {})", unit.full_name(), fetch_size);

        Ok(Box::new(PgCursor {
            client: Some(client),
            layout: RecordLayout::for_unit(unit),
            fetch_size: fetch_size.max(1),
            buffer: VecDeque::new(),
            exhausted: false,
            table: unit.full_name(),
        }))
    }
}

/// A declared cursor and the session it lives on.
pub struct PgCursor {
    client: Option<Object>,
    layout: Arc<RecordLayout>,
    fetch_size: usize,
    buffer: VecDeque<Row>,
    exhausted: bool,
    table: String,
}

impl PgCursor {
    async fn fill(&mut self) -> Result<()> {
        let client = self.client.as_ref().ok_or_else(|| {
            MigrateError::pool("cursor already closed", format!("reading {}", self.table))
        })?;
        let rows = client
            .query(
                format!("FETCH FORWARD {} FROM {}", self.fetch_size, CURSOR_NAME).as_str(),
                &[],
            )
            .await?;
        if rows.len() < self.fetch_size {
            self.exhausted = true;
        }
        self.buffer.extend(rows);
        Ok(())
    }

    fn to_record(&self, row: &Row) -> Result<TargetRecord> {
        let pk_len = self.layout.pk_columns.len();
        let mut pk_values = Vec::with_capacity(pk_len);
        for i in 0..pk_len {
            pk_values.push(row.try_get::<_, Option<String>>(i)?);
        }
        let mut values = Vec::with_capacity(self.layout.target_columns.len());
        for i in 0..self.layout.target_columns.len() {
            values.push(row.try_get::<_, Option<String>>(pk_len + i)?);
        }
        TargetRecord::new(self.layout.clone(), pk_values, values)
    }
}

#[async_trait]
impl RecordCursor for PgCursor {
    async fn next(&mut self) -> Result<Option<TargetRecord>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        match self.buffer.pop_front() {
            Some(row) => self.to_record(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        self.buffer.clear();
        let sql = format!("CLOSE {}; COMMIT", CURSOR_NAME);
        match client.batch_execute(&sql).await {
            Ok(()) => {
                debug!("{}: cursor closed", self.table);
                Ok(())
            }
            Err(e) => {
                drop(Object::take(client));
                Err(e.into())
            }
        }
    }
}

impl Drop for PgCursor {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // Detaching closes the connection, which makes the server abort the
            // read transaction and free the cursor.
            warn!("{}: cursor dropped without close; discarding session", self.table);
            drop(Object::take(client));
        }
    }
}
