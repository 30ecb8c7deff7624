//! The migration runner.
//!
//! # Usage
//!
//! ```rust,ignore
//! use strata_core::{MigrationSet, Migrator};
//!
//! let migrations = MigrationSet::from_dir("migrations")?;
//! let mut migrator = Migrator::new(backend, migrations);
//!
//! // Run all pending migrations before accepting traffic
//! let applied = migrator.run_pending_migrations().await?;
//! log::info!("Applied {} migrations", applied);
//! ```
//!
//! # No Rollback Support
//!
//! Migrations only move forward. A failed migration stops the run and stays
//! recorded as failed until an operator fixes it and calls
//! [`Migrator::repair`].

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::MigrationError;
use crate::ledger::{AppliedMigration, ApplyError, InvalidTransition, MigrationBackend, MigrationState};
use crate::migration::Migration;
use crate::set::MigrationSet;

/// Behaviour switches for a [`Migrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorOptions {
    /// Fail when an applied migration's file no longer matches the checksum
    /// recorded in the ledger.
    ///
    /// Default: `true`
    pub validate_checksums: bool,

    /// Write a `success = false` ledger record when a migration fails, which
    /// blocks later runs until [`Migrator::repair`] is called.
    ///
    /// Default: `true`
    pub record_failures: bool,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            validate_checksums: true,
            record_failures: true,
        }
    }
}

impl MigratorOptions {
    /// Sets [`MigratorOptions::validate_checksums`].
    pub fn with_validate_checksums(mut self, validate: bool) -> Self {
        self.validate_checksums = validate;
        self
    }

    /// Sets [`MigratorOptions::record_failures`].
    pub fn with_record_failures(mut self, record: bool) -> Self {
        self.record_failures = record;
        self
    }
}

/// Status of one migration, as reported by [`Migrator::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// The migration version.
    pub version: i64,
    /// The migration description.
    pub description: String,
    /// `Pending`, `Applied` or `Failed`.
    pub state: MigrationState,
    /// When it was applied or failed, if it ever ran.
    pub applied_at: Option<DateTime<Utc>>,
    /// Whether a migration file exists for this version.
    pub available: bool,
}

/// Applies a [`MigrationSet`] against a [`MigrationBackend`], in order,
/// exactly once per version.
#[derive(Debug)]
pub struct Migrator<B> {
    backend: B,
    migrations: MigrationSet,
    options: MigratorOptions,
    last_run: Vec<(i64, MigrationState)>,
}

type MigrateResult<T, B> = Result<T, MigrationError<<B as MigrationBackend>::Error>>;

impl<B: MigrationBackend> Migrator<B> {
    /// Creates a migrator with default options.
    pub fn new(backend: B, migrations: MigrationSet) -> Self {
        Self {
            backend,
            migrations,
            options: MigratorOptions::default(),
            last_run: Vec::new(),
        }
    }

    /// Replaces the options.
    pub fn with_options(mut self, options: MigratorOptions) -> Self {
        self.options = options;
        self
    }

    /// The migrations this runner applies.
    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Versions attempted by the most recent [`Migrator::run_pending_migrations`]
    /// and the state each one ended in, in the order they ran.
    pub fn last_run(&self) -> &[(i64, MigrationState)] {
        &self.last_run
    }

    /// Consumes the migrator, returning the backend.
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Runs all pending migrations under the migration lock.
    ///
    /// Each migration runs in its own transaction together with its ledger
    /// record. The first failure aborts the run: later migrations are not
    /// attempted and previously committed ones stay committed.
    ///
    /// Returns the number of migrations applied.
    pub async fn run_pending_migrations(&mut self) -> MigrateResult<usize, B> {
        self.last_run.clear();
        self.backend
            .acquire_lock()
            .await
            .map_err(MigrationError::LockUnavailable)?;

        let result = self.run_locked().await;

        if let Err(e) = self.backend.release_lock().await {
            log::warn!("Failed to release migration lock: {}", e);
        }

        result
    }

    async fn run_locked(&mut self) -> MigrateResult<usize, B> {
        let applied = self.load_ledger().await?;
        self.verify(&applied)?;

        let mut latest_applied = applied
            .iter()
            .filter(|record| record.success)
            .map(|record| record.version)
            .max()
            .unwrap_or(0);

        let mut count = 0;
        for migration in self.migrations.iter() {
            let already_applied = self
                .backend
                .has_applied(migration.version())
                .await
                .map_err(MigrationError::LedgerUnavailable)?;
            if already_applied {
                log::debug!(
                    "Skipping migration {} ({}): already applied",
                    migration.version(),
                    migration.description()
                );
                continue;
            }

            if migration.version() < latest_applied {
                return Err(MigrationError::OutOfOrder {
                    version: migration.version(),
                    latest_applied,
                });
            }

            log::info!(
                "Running migration {} ({})...",
                migration.version(),
                migration.description()
            );

            advance(&mut self.last_run, migration.version(), MigrationState::Applying)?;
            let started = Instant::now();
            match self.backend.apply(migration).await {
                Ok(record) => {
                    advance(&mut self.last_run, record.version, MigrationState::Applied)?;
                    log::info!(
                        "Migration {} ({}) applied successfully in {}ms",
                        record.version,
                        record.description,
                        record.execution_ms
                    );
                    latest_applied = record.version;
                    count += 1;
                }
                Err(ApplyError::Statement { index, source }) => {
                    advance(&mut self.last_run, migration.version(), MigrationState::Failed)?;
                    log::error!(
                        "Migration {} ({}) failed on statement {}: {}",
                        migration.version(),
                        migration.description(),
                        index,
                        source
                    );
                    if self.options.record_failures {
                        record_failure(&mut self.backend, migration, started).await;
                    }
                    return Err(MigrationError::StatementExecution {
                        version: migration.version(),
                        description: migration.description().to_string(),
                        statement: index,
                        source,
                    });
                }
                Err(ApplyError::Transaction(e)) => {
                    advance(&mut self.last_run, migration.version(), MigrationState::Failed)?;
                    return Err(MigrationError::Backend(e));
                }
            }
        }

        if count == 0 {
            log::info!("Schema is up to date, no migrations applied");
        }

        Ok(count)
    }

    async fn load_ledger(&mut self) -> MigrateResult<Vec<AppliedMigration>, B> {
        self.backend
            .ensure_ledger()
            .await
            .map_err(MigrationError::LedgerUnavailable)?;
        self.backend
            .applied()
            .await
            .map_err(MigrationError::LedgerUnavailable)
    }

    fn verify(&self, applied: &[AppliedMigration]) -> MigrateResult<(), B> {
        for record in applied {
            if !record.success {
                return Err(MigrationError::PreviouslyFailed {
                    version: record.version,
                    description: record.description.clone(),
                });
            }

            match self.migrations.get(record.version) {
                Some(migration)
                    if self.options.validate_checksums
                        && migration.checksum() != record.checksum =>
                {
                    return Err(MigrationError::ChecksumMismatch {
                        version: record.version,
                        description: record.description.clone(),
                        expected: record.checksum.clone(),
                        found: migration.checksum().to_string(),
                    });
                }
                Some(_) => {}
                None => log::warn!(
                    "Migration {} ({}) is recorded in the ledger but has no migration file",
                    record.version,
                    record.description
                ),
            }
        }
        Ok(())
    }

    /// Checks the ledger against the migration files without applying
    /// anything.
    pub async fn validate(&mut self) -> MigrateResult<(), B> {
        let applied = self.load_ledger().await?;
        self.verify(&applied)
    }

    /// Removes failed records from the ledger so corrected migrations can
    /// run again. Returns the number of records removed.
    pub async fn repair(&mut self) -> MigrateResult<u64, B> {
        self.backend
            .acquire_lock()
            .await
            .map_err(MigrationError::LockUnavailable)?;

        let result: MigrateResult<u64, B> = async {
            self.backend
                .ensure_ledger()
                .await
                .map_err(MigrationError::LedgerUnavailable)?;
            self.backend
                .remove_failed()
                .await
                .map_err(MigrationError::Backend)
        }
        .await;

        if let Err(e) = self.backend.release_lock().await {
            log::warn!("Failed to release migration lock: {}", e);
        }

        if let Ok(removed) = result {
            log::info!("Removed {} failed migration records", removed);
        }
        result
    }

    /// Returns the current migration version (0 if no migrations applied).
    pub async fn current_version(&mut self) -> MigrateResult<i64, B> {
        let applied = self.load_ledger().await?;
        Ok(applied
            .iter()
            .filter(|record| record.success)
            .map(|record| record.version)
            .max()
            .unwrap_or(0))
    }

    /// Returns all ledger records, ascending by version.
    pub async fn applied(&mut self) -> MigrateResult<Vec<AppliedMigration>, B> {
        self.load_ledger().await
    }

    /// Returns the migrations that have not been applied successfully.
    pub async fn pending(&mut self) -> MigrateResult<Vec<Migration>, B> {
        let applied = self.load_ledger().await?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| !applied.iter().any(|r| r.success && r.version == m.version()))
            .cloned()
            .collect())
    }

    /// Reports every known version: migration files and ledger records.
    pub async fn status(&mut self) -> MigrateResult<Vec<MigrationStatus>, B> {
        let applied = self.load_ledger().await?;

        let mut statuses: BTreeMap<i64, MigrationStatus> = self
            .migrations
            .iter()
            .map(|m| {
                (
                    m.version(),
                    MigrationStatus {
                        version: m.version(),
                        description: m.description().to_string(),
                        state: MigrationState::Pending,
                        applied_at: None,
                        available: true,
                    },
                )
            })
            .collect();

        for record in applied {
            let status = statuses
                .entry(record.version)
                .or_insert_with(|| MigrationStatus {
                    version: record.version,
                    description: record.description.clone(),
                    state: MigrationState::Pending,
                    applied_at: None,
                    available: false,
                });
            status.state = record.state();
            status.applied_at = Some(record.applied_at);
        }

        Ok(statuses.into_values().collect())
    }
}

/// Moves `version` to `to` in the run report.
fn advance(
    report: &mut Vec<(i64, MigrationState)>,
    version: i64,
    to: MigrationState,
) -> Result<(), InvalidTransition> {
    let from = match report.last() {
        Some(&(v, state)) if v == version => state,
        _ => MigrationState::Pending,
    };
    let state = from.transition(to)?;
    log::debug!("Migration {}: {:?} -> {:?}", version, from, state);
    match report.last_mut() {
        Some(entry) if entry.0 == version => entry.1 = state,
        _ => report.push((version, state)),
    }
    Ok(())
}

async fn record_failure<B: MigrationBackend>(backend: &mut B, migration: &Migration, started: Instant) {
    let record = AppliedMigration::for_migration(
        migration,
        Utc::now(),
        false,
        started.elapsed().as_millis() as i64,
    );
    if let Err(e) = backend.record_failure(&record).await {
        log::warn!(
            "Could not record failure of migration {} in the ledger: {}",
            migration.version(),
            e
        );
    }
}
