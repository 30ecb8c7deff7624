use async_trait::async_trait;
use chrono::Utc;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Postgres};
use std::time::Instant;
use strata_core::{AppliedMigration, ApplyError, Migration, MigrationBackend};

use crate::config::{LockMode, PgMigratorConfig};
use crate::ledger::PgLedger;
use crate::lock::AdvisoryLock;

/// Errors returned by the PgMigrationBackend
#[derive(Debug, thiserror::Error)]
pub enum PgMigrationBackendError {
    /// A database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// `LockMode::Try` found the lock held by another session
    #[error("Advisory lock '{0}' is held by another session")]
    LockHeld(String),
    /// The ledger already holds a successful record for this version
    #[error("Migration {0} is already applied")]
    AlreadyApplied(i64),
}

/// A [`MigrationBackend`] over one dedicated PostgreSQL connection.
///
/// The advisory lock is session scoped, so the lock, every migration
/// transaction and the unlock all run on the same connection.
pub struct PgMigrationBackend {
    conn: PoolConnection<Postgres>,
    ledger: PgLedger,
    lock: AdvisoryLock,
    lock_mode: LockMode,
    locked: bool,
}

impl std::fmt::Debug for PgMigrationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgMigrationBackend")
            .field("ledger", &self.ledger)
            .field("lock", &self.lock)
            .field("lock_mode", &self.lock_mode)
            .field("locked", &self.locked)
            .finish()
    }
}

impl PgMigrationBackend {
    /// Creates a backend on `conn`. `config` must already be validated.
    pub fn new(conn: PoolConnection<Postgres>, config: &PgMigratorConfig) -> Self {
        Self {
            conn,
            ledger: PgLedger::new(config.ledger_table.clone()),
            lock: AdvisoryLock::new(config.lock_name.clone()),
            lock_mode: config.lock_mode,
            locked: false,
        }
    }

    /// Whether this backend currently holds the advisory lock.
    pub fn holds_lock(&self) -> bool {
        self.locked
    }

    /// Returns the connection to the pool, or closes it if the advisory lock
    /// could not be released so the lock does not outlive this run.
    pub async fn finish(self) {
        if !self.locked {
            return;
        }
        log::warn!(
            "Closing migration connection still holding advisory lock '{}'",
            self.lock.name()
        );
        if let Err(e) = self.conn.detach().close().await {
            log::warn!("Failed to close migration connection: {}", e);
        }
    }
}

#[async_trait]
impl MigrationBackend for PgMigrationBackend {
    type Error = PgMigrationBackendError;

    async fn acquire_lock(&mut self) -> Result<(), Self::Error> {
        match self.lock_mode {
            LockMode::Blocking => {
                log::debug!("Waiting for advisory lock '{}'", self.lock.name());
                self.lock.acquire(&mut self.conn).await?;
            }
            LockMode::Try => {
                if !self.lock.try_acquire(&mut self.conn).await? {
                    return Err(PgMigrationBackendError::LockHeld(
                        self.lock.name().to_string(),
                    ));
                }
            }
            LockMode::Disabled => return Ok(()),
        }
        log::debug!("Acquired advisory lock '{}'", self.lock.name());
        self.locked = true;
        Ok(())
    }

    async fn release_lock(&mut self) -> Result<(), Self::Error> {
        if !self.locked {
            return Ok(());
        }
        if !self.lock.release(&mut self.conn).await? {
            log::warn!(
                "Advisory lock '{}' was not held at release",
                self.lock.name()
            );
        }
        self.locked = false;
        Ok(())
    }

    async fn ensure_ledger(&mut self) -> Result<(), Self::Error> {
        self.ledger.ensure_table(&mut *self.conn).await?;
        Ok(())
    }

    async fn applied(&mut self) -> Result<Vec<AppliedMigration>, Self::Error> {
        Ok(self.ledger.fetch_all(&mut *self.conn).await?)
    }

    async fn has_applied(&mut self, version: i64) -> Result<bool, Self::Error> {
        Ok(self.ledger.has_applied(version, &mut *self.conn).await?)
    }

    async fn apply(
        &mut self,
        migration: &Migration,
    ) -> Result<AppliedMigration, ApplyError<Self::Error>> {
        let started = Instant::now();
        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(transaction_error)?;

        for (idx, statement) in migration.statements().into_iter().enumerate() {
            // Dropping `tx` on error rolls the transaction back.
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| ApplyError::Statement {
                    index: idx + 1,
                    source: PgMigrationBackendError::from(e),
                })?;
        }

        let record = AppliedMigration::for_migration(
            migration,
            Utc::now(),
            true,
            started.elapsed().as_millis() as i64,
        );
        let written = self
            .ledger
            .record(&record, &mut *tx)
            .await
            .map_err(transaction_error)?;
        if written == 0 {
            return Err(ApplyError::Transaction(
                PgMigrationBackendError::AlreadyApplied(migration.version()),
            ));
        }

        tx.commit()
            .await
            .map_err(transaction_error)?;

        Ok(record)
    }

    async fn record_failure(&mut self, record: &AppliedMigration) -> Result<(), Self::Error> {
        self.ledger.record(record, &mut *self.conn).await?;
        Ok(())
    }

    async fn remove_failed(&mut self) -> Result<u64, Self::Error> {
        Ok(self.ledger.remove_failed(&mut *self.conn).await?)
    }
}

fn transaction_error(e: sqlx::Error) -> ApplyError<PgMigrationBackendError> {
    ApplyError::Transaction(e.into())
}
