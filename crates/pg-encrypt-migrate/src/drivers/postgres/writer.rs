//! Batch updates for each write strategy.
//!
//! All values are bound as text. Rows are matched on the full primary key, with
//! each key parameter cast to the key column's declared type so the primary key
//! index is usable.

use async_trait::async_trait;
use deadpool_postgres::{Pool, Transaction};
use tokio_postgres::types::ToSql;
use tracing::warn;

use crate::core::identifier::{qualify_pg, quote_pg, validate_type_name};
use crate::core::{backup_column_name, ChunkExecutor, MigrationUnit, TargetRecord, WriteStrategy};
use crate::error::{MigrateError, Result};

/// Maximum bind parameters in one statement (PostgreSQL protocol limit).
const MAX_BIND_PARAMS: usize = 65_535;

/// A statement and its text parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpdateStatement {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

impl UpdateStatement {
    fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect()
    }
}

/// `"a" = $n::text::<type> AND ...` starting at parameter `first`.
fn pk_predicate(unit: &MigrationUnit, first: usize) -> Result<String> {
    let mut parts = Vec::with_capacity(unit.pk_columns.len());
    for (i, pk) in unit.pk_columns.iter().enumerate() {
        validate_type_name(&pk.data_type)?;
        parts.push(format!(
            "{} = ${}::text::{}",
            quote_pg(&pk.name)?,
            first + i,
            pk.data_type
        ));
    }
    Ok(parts.join(" AND "))
}

/// One statement for the whole batch:
///
/// ```sql
/// UPDATE s.t AS t SET
///   c = COALESCE(v.e0, t.c),
///   c_bak = CASE WHEN v.e0 IS NULL THEN t.c_bak ELSE v.o0 END
/// FROM (VALUES ($1::text, $2::text, $3::text), ...) AS v(k0, e0, o0)
/// WHERE t.pk = v.k0::<pk type>
/// ```
///
/// Only columns migrated by at least one record appear. A NULL `e<j>` leaves
/// that record's column and backup untouched.
pub(crate) fn build_bulk_update(
    unit: &MigrationUnit,
    batch: &[TargetRecord],
) -> Result<UpdateStatement> {
    let active: Vec<usize> = (0..unit.target_columns.len())
        .filter(|&j| batch.iter().any(|r| r.transformed_values()[j].is_some()))
        .collect();

    let per_row = unit.pk_columns.len() + 2 * active.len();
    if per_row * batch.len() > MAX_BIND_PARAMS {
        return Err(MigrateError::Write {
            table: unit.table_name.clone(),
            attempts: 1,
            message: format!(
                "bulk update needs {} parameters, limit is {}",
                per_row * batch.len(),
                MAX_BIND_PARAMS
            ),
        });
    }

    let mut sets = Vec::with_capacity(active.len() * 2);
    for &j in &active {
        let column = quote_pg(&unit.target_columns[j])?;
        let backup = quote_pg(&backup_column_name(&unit.target_columns[j]))?;
        sets.push(format!("{c} = COALESCE(v.e{j}, t.{c})", c = column, j = j));
        sets.push(format!(
            "{b} = CASE WHEN v.e{j} IS NULL THEN t.{b} ELSE v.o{j} END",
            b = backup,
            j = j
        ));
    }

    let mut aliases: Vec<String> = (0..unit.pk_columns.len()).map(|i| format!("k{}", i)).collect();
    for &j in &active {
        aliases.push(format!("e{}", j));
        aliases.push(format!("o{}", j));
    }

    let mut params = Vec::with_capacity(per_row * batch.len());
    let mut tuples = Vec::with_capacity(batch.len());
    for record in batch {
        let mut placeholders = Vec::with_capacity(per_row);
        for key in record.pk_values() {
            params.push(Some(key.clone()));
            placeholders.push(format!("${}::text", params.len()));
        }
        for &j in &active {
            let encrypted = record.transformed_values()[j].clone();
            let original = if encrypted.is_some() {
                record.original_values()[j].clone()
            } else {
                None
            };
            params.push(encrypted);
            placeholders.push(format!("${}::text", params.len()));
            params.push(original);
            placeholders.push(format!("${}::text", params.len()));
        }
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    let mut predicates = Vec::with_capacity(unit.pk_columns.len());
    for (i, pk) in unit.pk_columns.iter().enumerate() {
        validate_type_name(&pk.data_type)?;
        predicates.push(format!("t.{} = v.k{}::{}", quote_pg(&pk.name)?, i, pk.data_type));
    }

    Ok(UpdateStatement {
        sql: format!(
            "UPDATE {} AS t SET {} FROM (VALUES {}) AS v({}) WHERE {}",
            qualify_pg(&unit.schema, &unit.table_name)?,
            sets.join(", "),
            tuples.join(", "),
            aliases.join(", "),
            predicates.join(" AND ")
        ),
        params,
    })
}

/// One statement per record covering its migrated columns and their backups.
pub(crate) fn build_record_update(
    unit: &MigrationUnit,
    record: &TargetRecord,
) -> Result<UpdateStatement> {
    let mut sets = Vec::new();
    let mut params = Vec::new();
    for (column, original, encrypted) in record.migrated_columns() {
        params.push(Some(encrypted.to_string()));
        sets.push(format!("{} = ${}::text", quote_pg(column)?, params.len()));
        params.push(original.map(String::from));
        sets.push(format!(
            "{} = ${}::text",
            quote_pg(&backup_column_name(column))?,
            params.len()
        ));
    }
    let first_key = params.len() + 1;
    params.extend(record.pk_values().iter().cloned().map(Some));

    Ok(UpdateStatement {
        sql: format!(
            "UPDATE {} SET {} WHERE {}",
            qualify_pg(&unit.schema, &unit.table_name)?,
            sets.join(", "),
            pk_predicate(unit, first_key)?
        ),
        params,
    })
}

/// One statement per migrated column, with or without its backup.
pub(crate) fn build_column_updates(
    unit: &MigrationUnit,
    record: &TargetRecord,
    with_backup: bool,
) -> Result<Vec<UpdateStatement>> {
    let table = qualify_pg(&unit.schema, &unit.table_name)?;
    let mut statements = Vec::new();
    for (column, original, encrypted) in record.migrated_columns() {
        let mut params = vec![Some(encrypted.to_string())];
        let mut sets = vec![format!("{} = $1::text", quote_pg(column)?)];
        if with_backup {
            params.push(original.map(String::from));
            sets.push(format!(
                "{} = $2::text",
                quote_pg(&backup_column_name(column))?
            ));
        }
        let first_key = params.len() + 1;
        params.extend(record.pk_values().iter().cloned().map(Some));
        statements.push(UpdateStatement {
            sql: format!(
                "UPDATE {} SET {} WHERE {}",
                table,
                sets.join(", "),
                pk_predicate(unit, first_key)?
            ),
            params,
        });
    }
    Ok(statements)
}

/// Runs each write attempt in its own transaction on a pooled session.
#[derive(Clone)]
pub struct PgChunkExecutor {
    pool: Pool,
}

impl PgChunkExecutor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn apply(
        tx: &Transaction<'_>,
        unit: &MigrationUnit,
        strategy: WriteStrategy,
        batch: &[TargetRecord],
    ) -> Result<u64> {
        match strategy {
            WriteStrategy::Bulk => {
                let stmt = build_bulk_update(unit, batch)?;
                Ok(tx.execute(stmt.sql.as_str(), &stmt.param_refs()).await?)
            }
            WriteStrategy::PerRecord => {
                let mut written = 0;
                for record in batch {
                    let stmt = build_record_update(unit, record)?;
                    written += tx.execute(stmt.sql.as_str(), &stmt.param_refs()).await?;
                }
                Ok(written)
            }
            WriteStrategy::PerColumn | WriteStrategy::TargetOnly => {
                let with_backup = strategy.writes_backup();
                let mut written = 0;
                for record in batch {
                    let mut touched = 0;
                    for stmt in build_column_updates(unit, record, with_backup)? {
                        touched = touched.max(tx.execute(stmt.sql.as_str(), &stmt.param_refs()).await?);
                    }
                    written += touched;
                }
                Ok(written)
            }
        }
    }
}

#[async_trait]
impl ChunkExecutor for PgChunkExecutor {
    async fn execute(
        &self,
        unit: &MigrationUnit,
        strategy: WriteStrategy,
        batch: &[TargetRecord],
    ) -> Result<u64> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting writer session"))?;
        let tx = client.transaction().await?;

        match Self::apply(&tx, unit, strategy, batch).await {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(
                        "{}: rollback after {} failure also failed: {}",
                        unit.full_name(),
                        strategy,
                        rollback
                    );
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PkColumn, RecordLayout};

    fn composite_unit() -> MigrationUnit {
        MigrationUnit {
            schema: "public".to_string(),
            table_name: "order_line".to_string(),
            target_columns: vec!["note".to_string(), "card".to_string()],
            pk_columns: vec![
                PkColumn {
                    name: "order_id".to_string(),
                    data_type: "bigint".to_string(),
                },
                PkColumn {
                    name: "line_no".to_string(),
                    data_type: "integer".to_string(),
                },
            ],
        }
    }

    fn record(unit: &MigrationUnit, key: (&str, &str), note: Option<&str>, card: Option<&str>) -> TargetRecord {
        let mut r = TargetRecord::new(
            RecordLayout::for_unit(unit),
            vec![Some(key.0.to_string()), Some(key.1.to_string())],
            vec![Some("n".to_string()), Some("c".to_string())],
        )
        .unwrap();
        if let Some(v) = note {
            r.set_transformed(0, v.to_string());
        }
        if let Some(v) = card {
            r.set_transformed(1, v.to_string());
        }
        r
    }

    #[test]
    fn test_bulk_update_matches_full_key() {
        let unit = composite_unit();
        let batch = vec![
            record(&unit, ("1", "1"), None, Some("E1")),
            record(&unit, ("1", "2"), None, Some("E2")),
        ];
        let stmt = build_bulk_update(&unit, &batch).unwrap();

        assert_eq!(
            stmt.sql,
            "UPDATE \"public\".\"order_line\" AS t SET \
             \"card\" = COALESCE(v.e1, t.\"card\"), \
             \"card_bak\" = CASE WHEN v.e1 IS NULL THEN t.\"card_bak\" ELSE v.o1 END \
             FROM (VALUES ($1::text, $2::text, $3::text, $4::text), \
             ($5::text, $6::text, $7::text, $8::text)) AS v(k0, k1, e1, o1) \
             WHERE t.\"order_id\" = v.k0::bigint AND t.\"line_no\" = v.k1::integer"
        );
        assert_eq!(
            stmt.params,
            vec![
                Some("1".into()),
                Some("1".into()),
                Some("E1".into()),
                Some("c".into()),
                Some("1".into()),
                Some("2".into()),
                Some("E2".into()),
                Some("c".into()),
            ]
        );
    }

    #[test]
    fn test_bulk_update_nulls_untransformed_cells() {
        let unit = composite_unit();
        let batch = vec![
            record(&unit, ("1", "1"), Some("N1"), None),
            record(&unit, ("1", "2"), None, Some("E2")),
        ];
        let stmt = build_bulk_update(&unit, &batch).unwrap();
        // Row 1 has no card ciphertext, so its e1/o1 are NULL.
        assert_eq!(stmt.params[4], None);
        assert_eq!(stmt.params[5], None);
        // Row 2 has no note ciphertext.
        assert_eq!(stmt.params[8], None);
        assert_eq!(stmt.params[9], None);
    }

    #[test]
    fn test_bulk_update_parameter_limit() {
        let unit = composite_unit();
        let batch: Vec<_> = (0..20_000)
            .map(|i| record(&unit, ("1", &i.to_string()), Some("N"), Some("C")))
            .collect();
        assert!(build_bulk_update(&unit, &batch).is_err());
    }

    #[test]
    fn test_record_update() {
        let unit = composite_unit();
        let stmt = build_record_update(&unit, &record(&unit, ("7", "3"), Some("N"), None)).unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"public\".\"order_line\" SET \"note\" = $1::text, \"note_bak\" = $2::text \
             WHERE \"order_id\" = $3::text::bigint AND \"line_no\" = $4::text::integer"
        );
        assert_eq!(
            stmt.params,
            vec![Some("N".into()), Some("n".into()), Some("7".into()), Some("3".into())]
        );
    }

    #[test]
    fn test_column_updates_with_and_without_backup() {
        let unit = composite_unit();
        let r = record(&unit, ("7", "3"), Some("N"), Some("C"));

        let with_backup = build_column_updates(&unit, &r, true).unwrap();
        assert_eq!(with_backup.len(), 2);
        assert!(with_backup[1].sql.contains("\"card_bak\" = $2::text"));
        assert!(with_backup[1].sql.ends_with("\"line_no\" = $4::text::integer"));

        let target_only = build_column_updates(&unit, &r, false).unwrap();
        assert_eq!(
            target_only[0].sql,
            "UPDATE \"public\".\"order_line\" SET \"note\" = $1::text \
             WHERE \"order_id\" = $2::text::bigint AND \"line_no\" = $3::text::integer"
        );
        assert_eq!(target_only[0].params.len(), 3);
    }

    #[test]
    fn test_pk_type_is_validated() {
        let mut unit = composite_unit();
        unit.pk_columns[0].data_type = "bigint; DROP TABLE x".to_string();
        let r = record(&unit, ("7", "3"), Some("N"), None);
        assert!(build_record_update(&unit, &r).is_err());
    }
}
