use std::path::PathBuf;

use crate::ledger::InvalidTransition;

/// Errors raised while loading and validating a set of migrations.
///
/// Discovery happens before any statement is executed, so these errors never
/// leave the database half migrated.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Two migrations declare the same version.
    #[error("Duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        /// The version declared twice.
        version: i64,
        /// Source of the first migration with this version.
        first: String,
        /// Source of the second migration with this version.
        second: String,
    },

    /// A `.sql` file does not follow the `V{version}__{description}.sql` naming.
    #[error("Invalid migration file name '{file_name}': {reason}")]
    InvalidFileName {
        /// The offending file name.
        file_name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The migrations directory or one of its files could not be read.
    #[error("Failed to read migrations from {}: {source}", path.display())]
    Io {
        /// The path being read.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },
}

/// Errors returned by the [`Migrator`](crate::Migrator).
///
/// Every variant is fatal: the caller is expected to abort startup rather
/// than serve traffic against a schema in an unknown state.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError<E>
where
    E: std::error::Error + 'static,
{
    /// The migration set is invalid.
    #[error("Migration discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The migration lock could not be acquired.
    #[error("Migration lock unavailable: {0}")]
    LockUnavailable(#[source] E),

    /// The ledger could not be created or read.
    #[error("Migration ledger unavailable: {0}")]
    LedgerUnavailable(#[source] E),

    /// A statement of a migration failed. Its transaction was rolled back.
    #[error("Migration {version} ({description}) failed on statement {statement}: {source}")]
    StatementExecution {
        /// The version of the migration that failed.
        version: i64,
        /// The description of the migration that failed.
        description: String,
        /// 1-based index of the failing statement within the script.
        statement: usize,
        /// The backend error.
        #[source]
        source: E,
    },

    /// An applied migration's file was modified after it was applied.
    #[error("Migration {version} ({description}) checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch {
        /// The version of the migration with mismatched checksum.
        version: i64,
        /// The description of the migration.
        description: String,
        /// The checksum recorded in the ledger.
        expected: String,
        /// The checksum of the migration file.
        found: String,
    },

    /// A pending migration has a lower version than one already applied.
    #[error("Migration {version} is pending but version {latest_applied} is already applied")]
    OutOfOrder {
        /// The pending version.
        version: i64,
        /// The highest version already applied.
        latest_applied: i64,
    },

    /// The ledger holds a failed migration. It must be fixed and repaired
    /// before the runner will continue.
    #[error("Migration {version} ({description}) previously failed; fix it and run repair")]
    PreviouslyFailed {
        /// The version recorded as failed.
        version: i64,
        /// The description recorded in the ledger.
        description: String,
    },

    /// Any other backend failure (commit, ledger write, lock release).
    #[error("Migration backend error: {0}")]
    Backend(#[source] E),

    /// The runner moved a migration through an impossible lifecycle step.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}
