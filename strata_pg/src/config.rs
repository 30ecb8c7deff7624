//! Configuration for the PostgreSQL migrator.

use strata_core::MigratorOptions;

/// Default name of the ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "_strata_migrations";

/// Default name hashed into the advisory lock key.
pub const DEFAULT_LOCK_NAME: &str = "strata_migrations";

// Postgres truncates identifiers longer than this.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Configuration for [`PgMigrator`](crate::PgMigrator).
#[derive(Debug, Clone)]
pub struct PgMigratorConfig {
    /// Name of the ledger table. Must be a plain identifier, optionally
    /// schema-qualified (`schema.table`).
    ///
    /// Default: `_strata_migrations`
    pub ledger_table: String,

    /// Name the advisory lock key is derived from. Every instance that
    /// migrates the same database must use the same name.
    ///
    /// Default: `strata_migrations`
    pub lock_name: String,

    /// How concurrent runners are kept apart.
    pub lock_mode: LockMode,

    /// Runner behaviour shared with other backends.
    pub options: MigratorOptions,
}

impl Default for PgMigratorConfig {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            lock_mode: LockMode::default(),
            options: MigratorOptions::default(),
        }
    }
}

impl PgMigratorConfig {
    /// Sets the ledger table name.
    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger_table = table.into();
        self
    }

    /// Sets the advisory lock name.
    pub fn with_lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    /// Sets the lock mode.
    pub fn with_lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    /// Sets the runner options.
    pub fn with_options(mut self, options: MigratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Checks the configuration, returning a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        let parts: Vec<&str> = self.ledger_table.split('.').collect();
        if parts.len() > 2 {
            return Err(format!(
                "ledger table '{}' has more than one schema qualifier",
                self.ledger_table
            ));
        }
        for part in parts {
            if !is_identifier(part) {
                return Err(format!(
                    "ledger table '{}' is not a valid identifier",
                    self.ledger_table
                ));
            }
        }

        if self.lock_name.is_empty() {
            return Err("lock name must not be empty".to_string());
        }

        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut bytes = name.bytes();
    let starts_well = bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphabetic() || b == b'_');
    starts_well
        && name.len() <= MAX_IDENTIFIER_LEN
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Determines how multiple instances starting together coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum LockMode {
    /// Wait on a session-level advisory lock held for the whole run.
    /// Instances that start together migrate one after the other; the later
    /// ones find nothing pending.
    #[default]
    Blocking,

    /// Like `Blocking`, but fail with `LockUnavailable` instead of waiting
    /// when another instance holds the lock.
    Try,

    /// No locking. Only safe when a single process ever migrates.
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PgMigratorConfig::default();
        assert_eq!(config.ledger_table, "_strata_migrations");
        assert_eq!(config.lock_mode, LockMode::Blocking);
        assert!(config.options.validate_checksums);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn accepts_schema_qualified_table() {
        let config = PgMigratorConfig::default().with_ledger_table("app.schema_history");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unsafe_table_names() {
        let too_long = "x".repeat(64);
        for table in [
            "",
            "1table",
            "ledger; DROP TABLE users",
            "a.b.c",
            "quoted\"name",
            "app.",
            too_long.as_str(),
        ] {
            let config = PgMigratorConfig::default().with_ledger_table(table);
            assert!(config.validate().is_err(), "{table:?} should be rejected");
        }
    }

    #[test]
    fn rejects_empty_lock_name() {
        let config = PgMigratorConfig::default().with_lock_name("");
        assert!(config.validate().is_err());
    }
}
