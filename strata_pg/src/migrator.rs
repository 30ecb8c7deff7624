//! Running migrations against a PostgreSQL pool.
//!
//! # Usage
//!
//! ```rust,ignore
//! use strata_pg::{PgMigrator, PgMigratorConfig};
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://...").await?;
//! let migrator = PgMigrator::with_social_schema(pool, PgMigratorConfig::default())?;
//!
//! // Run all pending migrations before accepting traffic
//! let applied = migrator.run_pending_migrations().await?;
//! println!("Applied {} migrations", applied);
//!
//! // Check current version
//! println!("Current version: {}", migrator.current_version().await?);
//! ```

use sqlx::PgPool;
use std::path::Path;
use strata_core::{
    AppliedMigration, DiscoveryError, Migration, MigrationError, MigrationSet, MigrationStatus,
    Migrator,
};

use crate::backend::{PgMigrationBackend, PgMigrationBackendError};
use crate::config::PgMigratorConfig;
use crate::schema::social_schema;

/// Errors returned by the [`PgMigrator`].
#[derive(Debug, thiserror::Error)]
pub enum PgMigratorError {
    /// The configuration is invalid.
    #[error("Invalid migrator configuration: {0}")]
    InvalidConfig(String),

    /// A connection could not be acquired from the pool.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migrations could not be loaded.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The migration run failed.
    #[error(transparent)]
    Migration(#[from] MigrationError<PgMigrationBackendError>),
}

/// Applies a [`MigrationSet`] to the database behind a [`PgPool`].
///
/// Every operation acquires one connection from the pool for its duration.
#[derive(Debug, Clone)]
pub struct PgMigrator {
    pool: PgPool,
    migrations: MigrationSet,
    config: PgMigratorConfig,
}

impl PgMigrator {
    /// Creates a migrator for `migrations`.
    pub fn new(
        pool: PgPool,
        migrations: MigrationSet,
        config: PgMigratorConfig,
    ) -> Result<Self, PgMigratorError> {
        config.validate().map_err(PgMigratorError::InvalidConfig)?;
        Ok(Self {
            pool,
            migrations,
            config,
        })
    }

    /// Creates a migrator for the embedded social schema.
    pub fn with_social_schema(
        pool: PgPool,
        config: PgMigratorConfig,
    ) -> Result<Self, PgMigratorError> {
        Self::new(pool, social_schema()?, config)
    }

    /// Creates a migrator for the `V{version}__{description}.sql` files in `dir`.
    pub fn from_dir(
        pool: PgPool,
        dir: impl AsRef<Path>,
        config: PgMigratorConfig,
    ) -> Result<Self, PgMigratorError> {
        Self::new(pool, MigrationSet::from_dir(dir)?, config)
    }

    /// The migrations this migrator applies.
    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    /// The configuration.
    pub fn config(&self) -> &PgMigratorConfig {
        &self.config
    }

    async fn migrator(&self) -> Result<Migrator<PgMigrationBackend>, PgMigratorError> {
        let conn = self.pool.acquire().await?;
        let backend = PgMigrationBackend::new(conn, &self.config);
        Ok(Migrator::new(backend, self.migrations.clone()).with_options(self.config.options.clone()))
    }

    /// Runs all pending migrations.
    ///
    /// Holds the advisory lock for the whole run (see [`LockMode`](crate::LockMode)).
    /// Each migration runs in its own transaction together with its ledger
    /// record. If a migration fails, its transaction is rolled back,
    /// previously applied migrations remain committed and the error is
    /// returned; the caller should not start serving.
    ///
    /// Returns the number of migrations applied.
    pub async fn run_pending_migrations(&self) -> Result<usize, PgMigratorError> {
        let mut migrator = self.migrator().await?;
        let result = migrator.run_pending_migrations().await;
        migrator.into_backend().finish().await;
        Ok(result?)
    }

    /// Removes failed ledger records so fixed migrations can run again.
    ///
    /// Returns the number of records removed.
    pub async fn repair(&self) -> Result<u64, PgMigratorError> {
        let mut migrator = self.migrator().await?;
        let result = migrator.repair().await;
        migrator.into_backend().finish().await;
        Ok(result?)
    }

    /// Checks applied migrations against the migration files.
    pub async fn validate(&self) -> Result<(), PgMigratorError> {
        Ok(self.migrator().await?.validate().await?)
    }

    /// Returns the current migration version (0 if no migrations applied).
    pub async fn current_version(&self) -> Result<i64, PgMigratorError> {
        Ok(self.migrator().await?.current_version().await?)
    }

    /// Returns list of all pending migrations.
    pub async fn pending(&self) -> Result<Vec<Migration>, PgMigratorError> {
        Ok(self.migrator().await?.pending().await?)
    }

    /// Returns list of all ledger records.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>, PgMigratorError> {
        Ok(self.migrator().await?.applied().await?)
    }

    /// Returns the status of every known version.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>, PgMigratorError> {
        Ok(self.migrator().await?.status().await?)
    }
}
