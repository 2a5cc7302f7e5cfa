//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL implementations of the core traits
//! - [`common`]: shared utilities (TLS)

pub mod common;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};
pub use postgres::{PgCatalog, PgChunkExecutor, PgConfigStore, PgRecordSource};
