//! # Strata
//!
//! Ordered, versioned schema migrations. Enable the `postgres` feature for
//! the PostgreSQL backend and the embedded social schema, or `in-memory` for
//! a database-free backend.

#![deny(missing_docs)]

#[cfg(feature = "in-memory")]
/// In-memory migration backend.
pub mod mem {
    //! Contains the in-memory backend for the `strata` crate.
    pub use strata_mem::*;
}

#[cfg(feature = "postgres")]
/// PostgreSQL migration backend.
pub mod pg {
    //! Contains the PostgreSQL backend for the `strata` crate.
    pub use strata_pg::*;
}

pub use strata_core::*;

pub mod prelude {
    //! The prelude module for the `strata` crate.
    pub use strata_core::prelude::*;

    #[cfg(feature = "in-memory")]
    pub use super::mem::InMemoryMigrationBackend;
    #[cfg(feature = "postgres")]
    pub use super::pg::{LockMode, PgMigrator, PgMigratorConfig};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use strata_mem::InMemoryMigrationBackend;

    #[tokio::test]
    async fn facade_exposes_the_runner() {
        let set = MigrationSet::from_embedded(&[
            ("V1__create_users_table.sql", "CREATE TABLE users ();"),
            ("V2__create_posts_table.sql", "CREATE TABLE posts ();"),
        ])
        .unwrap();

        let mut migrator = Migrator::new(InMemoryMigrationBackend::new(), set);
        assert_eq!(migrator.run_pending_migrations().await.unwrap(), 2);
        assert_eq!(migrator.current_version().await.unwrap(), 2);
    }
}
