//! Session pool construction and connectivity checks.

use std::time::{Duration, Instant};

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::Serialize;
use tokio_postgres::Config as PgConfig;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::drivers::common::{SslMode, TlsBuilder};
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest wait for a free session before checkout fails.
const POOL_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the session pool and verify one connection.
///
/// Every unit takes two sessions at once (cursor and writer), so the pool must
/// hold at least two connections per concurrent worker to avoid starving.
pub async fn connect(config: &DatabaseConfig) -> Result<Pool> {
    let pool = build_pool(config)?;

    let client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, "testing PostgreSQL connection"))?;
    client.simple_query("SELECT 1").await?;

    info!("Connected to PostgreSQL: {}", config.display_target());
    Ok(pool)
}

/// Build the pool without connecting.
pub fn build_pool(config: &DatabaseConfig) -> Result<Pool> {
    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);
    pg_config.application_name("pg-encrypt-migrate");

    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(30));
    pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = match TlsBuilder::new(SslMode::parse(&config.ssl_mode)?).build()? {
        Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
        None => {
            warn!("PostgreSQL TLS is disabled. Credentials and plaintext values cross the network unencrypted.");
            Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
        }
    };

    Pool::builder(mgr)
        .max_size(config.max_connections)
        .wait_timeout(Some(POOL_WAIT_TIMEOUT))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))
}

/// Result of a connectivity probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    /// Host, port and database probed.
    pub target: String,
    /// Whether `SELECT version()` succeeded.
    pub connected: bool,
    /// Round trip including session checkout.
    pub latency_ms: u64,
    /// Server version string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Probe the database. Never fails; problems are reported in the result.
pub async fn health_check(config: &DatabaseConfig) -> HealthCheckResult {
    let start = Instant::now();
    let outcome = probe(config).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(version) => HealthCheckResult {
            target: config.display_target(),
            connected: true,
            latency_ms,
            server_version: Some(version),
            error: None,
        },
        Err(e) => HealthCheckResult {
            target: config.display_target(),
            connected: false,
            latency_ms,
            server_version: None,
            error: Some(e.to_string()),
        },
    }
}

async fn probe(config: &DatabaseConfig) -> Result<String> {
    let pool = build_pool(config)?;
    let client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, "health check"))?;
    let row = client.query_one("SELECT version()", &[]).await?;
    Ok(row.try_get(0)?)
}
