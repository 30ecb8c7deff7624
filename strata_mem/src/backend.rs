use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};

use strata_core::prelude::*;
use strata_core::ApplyError;

/// A statement that was committed by a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    /// The version of the migration that ran the statement.
    pub version: i64,
    /// The statement text.
    pub sql: String,
}

/// The in-memory database.
#[derive(Debug, Default)]
struct MemoryDatabase {
    ledger_created: bool,
    ledger: BTreeMap<i64, AppliedMigration>,
    executed: Vec<ExecutedStatement>,
    failing_statements: HashMap<i64, usize>,
    ledger_unavailable: bool,
}

/// Errors returned by the InMemoryMigrationBackend
#[derive(Debug, thiserror::Error)]
pub enum InMemoryMigrationBackendError {
    /// A statement was configured to fail with [`InMemoryMigrationBackend::fail_statement`].
    #[error("Statement {index} of migration {version} failed: {sql}")]
    StatementFailed {
        /// The migration version.
        version: i64,
        /// 1-based statement index.
        index: usize,
        /// The statement text.
        sql: String,
    },
    /// The ledger was made unavailable with [`InMemoryMigrationBackend::make_ledger_unavailable`].
    #[error("Ledger is unavailable")]
    LedgerUnavailable,
    /// The ledger was used before `ensure_ledger`.
    #[error("Ledger has not been created")]
    LedgerMissing,
    /// The version already has a successful ledger record.
    #[error("Migration {0} is already applied")]
    AlreadyApplied(i64),
}

/// An in-memory migration backend.
///
/// Clones share the same database and the same migration lock, so several
/// migrators built from clones behave like several service instances
/// starting against one database. Useful for testing; nothing is persisted.
pub struct InMemoryMigrationBackend {
    data: Arc<Mutex<MemoryDatabase>>,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Default for InMemoryMigrationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryMigrationBackend {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            lock: self.lock.clone(),
            guard: None,
        }
    }
}

impl std::fmt::Debug for InMemoryMigrationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMigrationBackend")
            .field("holds_lock", &self.guard.is_some())
            .finish()
    }
}

impl InMemoryMigrationBackend {
    /// Creates an empty database.
    pub fn new() -> Self {
        log::debug!("Creating a new InMemoryMigrationBackend");
        Self {
            data: Arc::new(Mutex::new(MemoryDatabase::default())),
            lock: Arc::new(Mutex::new(())),
            guard: None,
        }
    }

    /// Makes statement `index` (1-based) of migration `version` fail.
    pub async fn fail_statement(&self, version: i64, index: usize) {
        self.data
            .lock()
            .await
            .failing_statements
            .insert(version, index);
    }

    /// Clears a failure configured with [`Self::fail_statement`].
    pub async fn clear_failure(&self, version: i64) {
        self.data.lock().await.failing_statements.remove(&version);
    }

    /// Makes every ledger access fail, like a lost connection.
    pub async fn make_ledger_unavailable(&self) {
        self.data.lock().await.ledger_unavailable = true;
    }

    /// Statements committed so far, in commit order.
    pub async fn executed_statements(&self) -> Vec<ExecutedStatement> {
        self.data.lock().await.executed.clone()
    }

    /// Raw ledger contents, ascending by version.
    pub async fn ledger(&self) -> Vec<AppliedMigration> {
        self.data.lock().await.ledger.values().cloned().collect()
    }

    /// Whether the ledger has been created.
    pub async fn ledger_exists(&self) -> bool {
        self.data.lock().await.ledger_created
    }

    /// Whether this handle currently holds the migration lock.
    pub fn holds_lock(&self) -> bool {
        self.guard.is_some()
    }
}

impl MemoryDatabase {
    fn check_ledger(&self) -> Result<(), InMemoryMigrationBackendError> {
        if self.ledger_unavailable {
            return Err(InMemoryMigrationBackendError::LedgerUnavailable);
        }
        if !self.ledger_created {
            return Err(InMemoryMigrationBackendError::LedgerMissing);
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationBackend for InMemoryMigrationBackend {
    type Error = InMemoryMigrationBackendError;

    async fn acquire_lock(&mut self) -> Result<(), Self::Error> {
        if self.guard.is_none() {
            self.guard = Some(self.lock.clone().lock_owned().await);
        }
        Ok(())
    }

    async fn release_lock(&mut self) -> Result<(), Self::Error> {
        if self.guard.take().is_none() {
            log::warn!("Released a migration lock that was not held");
        }
        Ok(())
    }

    async fn ensure_ledger(&mut self) -> Result<(), Self::Error> {
        let mut data = self.data.lock().await;
        if data.ledger_unavailable {
            return Err(InMemoryMigrationBackendError::LedgerUnavailable);
        }
        data.ledger_created = true;
        Ok(())
    }

    async fn applied(&mut self) -> Result<Vec<AppliedMigration>, Self::Error> {
        let data = self.data.lock().await;
        data.check_ledger()?;
        Ok(data.ledger.values().cloned().collect())
    }

    async fn has_applied(&mut self, version: i64) -> Result<bool, Self::Error> {
        let data = self.data.lock().await;
        data.check_ledger()?;
        Ok(data.ledger.get(&version).is_some_and(|record| record.success))
    }

    async fn apply(
        &mut self,
        migration: &Migration,
    ) -> Result<AppliedMigration, ApplyError<Self::Error>> {
        // Give concurrent runners a chance to interleave.
        tokio::task::yield_now().await;

        let started = Instant::now();
        let mut data = self.data.lock().await;
        data.check_ledger().map_err(ApplyError::Transaction)?;
        if data.ledger.get(&migration.version()).is_some_and(|r| r.success) {
            return Err(ApplyError::Transaction(
                InMemoryMigrationBackendError::AlreadyApplied(migration.version()),
            ));
        }

        let statements = migration.statements();
        if let Some(&index) = data.failing_statements.get(&migration.version()) {
            if let Some(sql) = statements.get(index.saturating_sub(1)) {
                return Err(ApplyError::Statement {
                    index,
                    source: InMemoryMigrationBackendError::StatementFailed {
                        version: migration.version(),
                        index,
                        sql: sql.to_string(),
                    },
                });
            }
        }

        // Holding the data lock for the whole apply makes it atomic.
        data.executed
            .extend(statements.iter().map(|sql| ExecutedStatement {
                version: migration.version(),
                sql: sql.to_string(),
            }));
        let record = AppliedMigration::for_migration(
            migration,
            Utc::now(),
            true,
            started.elapsed().as_millis() as i64,
        );
        data.ledger.insert(record.version, record.clone());

        Ok(record)
    }

    async fn record_failure(&mut self, record: &AppliedMigration) -> Result<(), Self::Error> {
        let mut data = self.data.lock().await;
        data.check_ledger()?;
        data.ledger.insert(record.version, record.clone());
        Ok(())
    }

    async fn remove_failed(&mut self) -> Result<u64, Self::Error> {
        let mut data = self.data.lock().await;
        data.check_ledger()?;
        let before = data.ledger.len();
        data.ledger.retain(|_, record| record.success);
        Ok((before - data.ledger.len()) as u64)
    }
}
