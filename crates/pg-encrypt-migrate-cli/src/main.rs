//! pg-encrypt-migrate CLI - in-place column encryption for PostgreSQL.

use clap::{Parser, Subcommand};
use pg_encrypt_migrate::drivers::postgres::health_check;
use pg_encrypt_migrate::{AesGcmProvider, Config, MigrateError, MigrationResult, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-encrypt-migrate")]
#[command(about = "In-place column encryption for PostgreSQL with backup columns")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt every active table in the configuration relation
    Run {
        /// Override schema holding the tables
        #[arg(long)]
        schema: Option<String>,

        /// Override number of tables migrated concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Only migrate these tables (repeatable)
        #[arg(long = "table")]
        tables: Vec<String>,

        /// Dry run: resolve keys and columns without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show every configuration row and its status
    Status,

    /// Create the configuration relation if it does not exist
    InitConfigTable,

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            schema,
            workers,
            tables,
            dry_run,
        } => {
            if let Some(schema) = schema {
                config.database.schema = schema;
            }
            if let Some(w) = workers {
                config.migration.workers = w;
            }
            if !tables.is_empty() {
                config.migration.tables = tables;
            }
            config.validate()?;

            // Key problems surface before any connection is opened.
            let provider = if dry_run {
                None
            } else {
                Some(AesGcmProvider::from_env(&config.encryption.key_env)?)
            };

            let mut orchestrator = Orchestrator::new(config).await?;
            if let Some(provider) = provider {
                orchestrator = orchestrator.with_provider(Arc::new(provider));
            }

            let cancel_token = setup_signal_handler().await?;
            let result = orchestrator.run(cancel_token, dry_run).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_summary(&result, dry_run);
            }
            Ok(result.exit_code())
        }

        Commands::Status => {
            let orchestrator = Orchestrator::new(config).await?;
            let rows = orchestrator.status().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No configuration rows.");
            } else {
                println!("{:<32} {:<10} COLUMNS", "TABLE", "STATUS");
                for row in rows {
                    let status = match (row.status, row.raw_status.as_deref()) {
                        (Some(s), _) => s.to_string(),
                        (None, Some(raw)) => format!("?{}", raw),
                        (None, None) => "(null)".to_string(),
                    };
                    println!(
                        "{:<32} {:<10} {}",
                        row.table_name,
                        status,
                        row.target_columns.join(",")
                    );
                }
            }
            Ok(0)
        }

        Commands::InitConfigTable => {
            let orchestrator = Orchestrator::new(config.clone()).await?;
            orchestrator.init_config_table().await?;
            println!(
                "Configuration table {}.{} is ready",
                config.database.schema, config.migration.config_table
            );
            Ok(0)
        }

        Commands::HealthCheck => {
            let result = health_check(&config.database).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  PostgreSQL {}: {} ({}ms)",
                    result.target,
                    if result.connected { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(ref version) = result.server_version {
                    println!("    Version: {}", version);
                }
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
            }

            if !result.connected {
                return Err(MigrateError::pool(
                    result.error.unwrap_or_default(),
                    "health check",
                ));
            }
            Ok(0)
        }
    }
}

fn print_summary(result: &MigrationResult, dry_run: bool) {
    let status_msg = match (dry_run, result.status.as_str()) {
        (true, _) => "Dry run completed!",
        (false, "no_op") => "Nothing to migrate.",
        (false, "completed") => "Migration completed!",
        (false, "cancelled") => "Migration cancelled.",
        _ => "Migration finished with failures.",
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Tables: {}/{}",
        result.units_completed, result.units_total
    );
    println!("  Rows written: {}", result.rows_written);
    println!("  Values encrypted: {}", result.values_encrypted);
    for unit in &result.units {
        println!(
            "    {}: {:?} ({} rows, {} already encrypted)",
            unit.table, unit.status, unit.rows_written, unit.stats.values_already_encrypted
        );
        if let Some(ref err) = unit.error {
            println!("      Error: {}", err);
        }
    }
    if !result.failed_tables.is_empty() {
        println!("  Failed tables: {:?}", result.failed_tables);
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Cancel the token on SIGINT or SIGTERM. In-flight chunk transactions finish;
/// no new chunk starts.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Stopping at the next chunk boundary...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping at the next chunk boundary...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
