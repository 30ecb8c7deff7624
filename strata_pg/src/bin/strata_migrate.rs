//! Boot-time migration runner.
//!
//! Applies pending migrations to `DATABASE_URL` and exits non-zero on any
//! failure, so a deployment can run it before starting the service.
//!
//! ```text
//! DATABASE_URL=postgres://... strata-migrate            # migrate
//! DATABASE_URL=postgres://... strata-migrate status
//! DATABASE_URL=postgres://... strata-migrate repair
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use strata_pg::{LockMode, PgMigrator, PgMigratorConfig};

#[derive(Debug, Parser)]
#[command(name = "strata-migrate", about = "Apply versioned schema migrations")]
struct Cli {
    /// Connection string of the database to migrate
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Directory of V{version}__{description}.sql files. The embedded social
    /// schema is used when omitted.
    #[arg(long, env = "STRATA_MIGRATIONS_DIR")]
    migrations_dir: Option<PathBuf>,

    /// Ledger table name
    #[arg(long, env = "STRATA_LEDGER_TABLE", default_value = strata_pg::config::DEFAULT_LEDGER_TABLE)]
    ledger_table: String,

    /// Fail instead of waiting when another instance is migrating
    #[arg(long)]
    no_wait: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations (default)
    Migrate,
    /// Print the state of every migration
    Status,
    /// Check applied migrations against the files without applying anything
    Validate,
    /// Remove failed ledger records so fixed migrations can be retried
    Repair,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    env_logger::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&cli.database_url)
        .await
        .context("Failed to connect to the database")?;

    let lock_mode = if cli.no_wait {
        LockMode::Try
    } else {
        LockMode::Blocking
    };
    let config = PgMigratorConfig::default()
        .with_ledger_table(cli.ledger_table)
        .with_lock_mode(lock_mode);

    let migrator = match cli.migrations_dir {
        Some(dir) => PgMigrator::from_dir(pool, &dir, config)
            .with_context(|| format!("Failed to load migrations from {}", dir.display()))?,
        None => PgMigrator::with_social_schema(pool, config)
            .context("Failed to load the embedded migrations")?,
    };

    match cli.command.unwrap_or(Command::Migrate) {
        Command::Migrate => {
            let applied = migrator
                .run_pending_migrations()
                .await
                .context("Migration run failed")?;
            log::info!(
                "Applied {} migrations, schema is at version {}",
                applied,
                migrator.current_version().await?
            );
        }
        Command::Status => {
            for status in migrator.status().await? {
                let applied_at = status
                    .applied_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                let missing = if status.available { "" } else { " (no file)" };
                println!(
                    "{:>6}  {:<8}  {:<25}  {}{}",
                    status.version,
                    format!("{:?}", status.state),
                    applied_at,
                    status.description,
                    missing
                );
            }
        }
        Command::Validate => {
            migrator.validate().await?;
            log::info!("All applied migrations match their files");
        }
        Command::Repair => {
            let removed = migrator.repair().await?;
            log::info!("Removed {} failed migration records", removed);
        }
    }

    Ok(())
}
