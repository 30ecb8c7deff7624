//! # Strata memory backend
//!
//! In-memory implementation of [`strata_core::MigrationBackend`], primarily
//! for testing the runner without a database:
//!
//! ```ignore
//! use strata_core::{Migration, MigrationSet, Migrator};
//! use strata_mem::InMemoryMigrationBackend;
//!
//! let backend = InMemoryMigrationBackend::new();
//! let set = MigrationSet::new([Migration::new(1, "create users", "CREATE TABLE users ()")?])?;
//! let mut migrator = Migrator::new(backend.clone(), set);
//!
//! assert_eq!(migrator.run_pending_migrations().await?, 1);
//! assert_eq!(backend.ledger().await.len(), 1);
//! ```
//!
//! Statements are not interpreted. They are split, recorded when their
//! migration commits, and can be made to fail with
//! [`InMemoryMigrationBackend::fail_statement`].

#![deny(missing_docs)]

mod backend;

pub use backend::*;
