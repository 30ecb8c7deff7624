//! The migration ledger and the backend seam the runner drives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::migration::Migration;

/// Record of a migration in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// The version number of the migration.
    pub version: i64,
    /// The description of the migration.
    pub description: String,
    /// The checksum recorded when the migration was applied.
    pub checksum: String,
    /// When the migration was applied (or failed).
    pub applied_at: DateTime<Utc>,
    /// Whether the migration committed successfully.
    pub success: bool,
    /// How long the migration took to run, in milliseconds.
    pub execution_ms: i64,
}

impl AppliedMigration {
    /// Builds the ledger record for `migration`.
    pub fn for_migration(
        migration: &Migration,
        applied_at: DateTime<Utc>,
        success: bool,
        execution_ms: i64,
    ) -> Self {
        Self {
            version: migration.version(),
            description: migration.description().to_string(),
            checksum: migration.checksum().to_string(),
            applied_at,
            success,
            execution_ms,
        }
    }

    /// The lifecycle state this record represents.
    pub fn state(&self) -> MigrationState {
        if self.success {
            MigrationState::Applied
        } else {
            MigrationState::Failed
        }
    }
}

/// Lifecycle of a single migration during a run.
///
/// `Pending -> Applying -> Applied` or `Pending -> Applying -> Failed`.
/// `Applied` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// Not yet applied.
    Pending,
    /// Statements are executing inside a transaction.
    Applying,
    /// Statements and ledger record committed.
    Applied,
    /// Statements failed; the transaction rolled back.
    Failed,
}

/// Error returned for a transition the lifecycle does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid migration state transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    /// State before the transition.
    pub from: MigrationState,
    /// Requested state.
    pub to: MigrationState,
}

impl MigrationState {
    /// Moves to `to` if the lifecycle allows it.
    pub fn transition(self, to: MigrationState) -> Result<MigrationState, InvalidTransition> {
        use MigrationState::*;
        match (self, to) {
            (Pending, Applying) | (Applying, Applied) | (Applying, Failed) => Ok(to),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }
}

/// Why [`MigrationBackend::apply`] failed.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError<E>
where
    E: std::error::Error + 'static,
{
    /// Statement at 1-based `index` failed. Nothing was committed.
    #[error("Statement {index} failed: {source}")]
    Statement {
        /// 1-based index of the failing statement.
        index: usize,
        /// The backend error.
        #[source]
        source: E,
    },
    /// The statements ran but beginning, recording or committing failed.
    /// Nothing was committed.
    #[error("Transaction failed: {0}")]
    Transaction(#[source] E),
}

/// Storage the [`Migrator`](crate::Migrator) applies migrations against.
///
/// A backend owns the ledger (colocated with the schema it tracks), the
/// migration lock, and the transactional application of a migration. All
/// calls of one run happen on the same backend instance, in sequence.
#[async_trait]
pub trait MigrationBackend: Send {
    /// Backend error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Blocks until this runner holds the migration lock, or fails.
    async fn acquire_lock(&mut self) -> Result<(), Self::Error>;

    /// Releases the migration lock.
    async fn release_lock(&mut self) -> Result<(), Self::Error>;

    /// Creates the ledger if it does not exist yet.
    async fn ensure_ledger(&mut self) -> Result<(), Self::Error>;

    /// All ledger records, ascending by version.
    async fn applied(&mut self) -> Result<Vec<AppliedMigration>, Self::Error>;

    /// Whether `version` has been applied successfully.
    async fn has_applied(&mut self, version: i64) -> Result<bool, Self::Error>;

    /// Executes the statements of `migration` and records its successful
    /// [`AppliedMigration`] in the ledger as one transaction.
    async fn apply(
        &mut self,
        migration: &Migration,
    ) -> Result<AppliedMigration, ApplyError<Self::Error>>;

    /// Records a failed migration outside of any migration transaction.
    async fn record_failure(&mut self, record: &AppliedMigration) -> Result<(), Self::Error>;

    /// Deletes failed records from the ledger, returning how many were removed.
    async fn remove_failed(&mut self) -> Result<u64, Self::Error>;
}
