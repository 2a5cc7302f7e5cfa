//! PostgreSQL driver.
//!
//! - [`PgCatalog`]: catalog queries and backup column DDL
//! - [`PgRecordSource`]: server-side cursor reader
//! - [`PgChunkExecutor`]: per-strategy batch updates
//! - [`PgConfigStore`]: the configuration relation
//! - [`pool`]: session pool and health check

mod catalog;
mod config_store;
pub mod pool;
mod reader;
mod writer;

pub use catalog::PgCatalog;
pub use config_store::PgConfigStore;
pub use pool::{connect, health_check, HealthCheckResult};
pub use reader::{PgCursor, PgRecordSource};
pub use writer::PgChunkExecutor;
