//! # Strata core
//!
//! Storage-agnostic building blocks for ordered schema migrations:
//!
//! - [`Migration`]: one versioned script, parsed from `V{version}__{description}.sql`.
//! - [`MigrationSet`]: the validated, ascending list of migrations.
//! - [`MigrationBackend`]: the seam a database implements (ledger, lock, transactions).
//! - [`Migrator`]: applies pending migrations in order, exactly once.

#![deny(missing_docs)]

mod error;
/// Ledger records and the backend trait.
pub mod ledger;
/// Migration files.
pub mod migration;
/// The migration runner.
pub mod migrator;
/// Migration sets.
pub mod set;

pub use error::{DiscoveryError, MigrationError};
pub use ledger::{AppliedMigration, ApplyError, InvalidTransition, MigrationBackend, MigrationState};
pub use migration::Migration;
pub use migrator::{MigrationStatus, Migrator, MigratorOptions};
pub use set::MigrationSet;

pub mod prelude {
    //! The prelude module for the `strata_core` crate.
    pub use super::{
        AppliedMigration, DiscoveryError, Migration, MigrationBackend, MigrationError,
        MigrationSet, MigrationState, Migrator, MigratorOptions,
    };
}
