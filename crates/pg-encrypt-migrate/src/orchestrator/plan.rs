//! Turning configuration rows into migration units.

use serde::Serialize;
use tracing::debug;

use crate::core::identifier::validate_identifier;
use crate::core::{Catalog, MigrationConfig, MigrationUnit, PkColumn};
use crate::error::{MigrateError, Result};

/// A table and its merged target columns, before primary key discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitPlan {
    pub table_name: String,
    pub target_columns: Vec<String>,
}

/// Merge configuration rows into one plan per distinct table.
///
/// Column lists of rows sharing a table are concatenated in row order with
/// duplicates dropped. When `only` is non-empty, tables not listed are skipped.
/// Tables appear in the order they are first seen.
pub fn plan_units(configs: &[MigrationConfig], only: &[String]) -> Vec<UnitPlan> {
    let mut plans: Vec<UnitPlan> = Vec::new();
    for config in configs {
        if !only.is_empty() && !only.iter().any(|t| t == &config.table_name) {
            debug!("Skipping {}: not in table filter", config.table_name);
            continue;
        }
        let index = match plans.iter().position(|p| p.table_name == config.table_name) {
            Some(i) => i,
            None => {
                plans.push(UnitPlan {
                    table_name: config.table_name.clone(),
                    target_columns: Vec::new(),
                });
                plans.len() - 1
            }
        };
        let plan = &mut plans[index];
        for column in &config.target_columns {
            if !plan.target_columns.contains(column) {
                plan.target_columns.push(column.clone());
            }
        }
    }
    plans
}

/// Discover the primary key and check the target columns of a planned table.
pub async fn resolve_unit(
    catalog: &dyn Catalog,
    schema: &str,
    plan: &UnitPlan,
) -> Result<MigrationUnit> {
    validate_identifier(&plan.table_name)?;
    if plan.target_columns.is_empty() {
        return Err(MigrateError::schema(&plan.table_name, "no target columns configured"));
    }

    let pk_names = catalog.primary_key_columns(schema, &plan.table_name).await?;
    if pk_names.is_empty() {
        return Err(MigrateError::schema(
            &plan.table_name,
            "no primary key found; rows cannot be addressed for update",
        ));
    }

    let mut pk_columns = Vec::with_capacity(pk_names.len());
    for name in pk_names {
        let data_type = catalog
            .column_type(schema, &plan.table_name, &name)
            .await?
            .ok_or_else(|| {
                MigrateError::schema(&plan.table_name, format!("primary key column {} vanished", name))
            })?;
        pk_columns.push(PkColumn { name, data_type });
    }

    for column in &plan.target_columns {
        validate_identifier(column)?;
        if pk_columns.iter().any(|pk| &pk.name == column) {
            return Err(MigrateError::schema(
                &plan.table_name,
                format!("primary key column {} cannot be encrypted", column),
            ));
        }
        if !catalog.column_exists(schema, &plan.table_name, column).await? {
            return Err(MigrateError::schema(
                &plan.table_name,
                format!("target column {} does not exist", column),
            ));
        }
    }

    Ok(MigrationUnit {
        schema: schema.to_string(),
        table_name: plan.table_name.clone(),
        target_columns: plan.target_columns.clone(),
        pk_columns,
    })
}
