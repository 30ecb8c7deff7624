//! # Strata postgres backend

#![deny(missing_docs)]

/// The MigrationBackend implementation for postgres
pub mod backend;

/// Configuration of the postgres migrator
pub mod config;

/// Ledger table queries
pub mod ledger;

/// Advisory lock helpers
pub mod lock;

/// Running migrations against a pool
pub mod migrator;

/// The embedded social schema migrations
pub mod schema;

pub use backend::{PgMigrationBackend, PgMigrationBackendError};
pub use config::{LockMode, PgMigratorConfig};
pub use ledger::{PgLedger, PgMigrationRecord};
pub use lock::AdvisoryLock;
pub use migrator::{PgMigrator, PgMigratorError};
pub use schema::social_schema;
