use sqlx::{FromRow, PgExecutor};
use strata_core::AppliedMigration;

/// Postgres representation of a ledger row
#[derive(Debug, FromRow)]
pub struct PgMigrationRecord {
    /// The migration version
    pub version: i64,
    /// The migration description
    pub description: String,
    /// SHA-256 of the script when it ran
    pub checksum: String,
    /// When the migration committed or failed
    pub applied_at: chrono::DateTime<chrono::Utc>,
    /// Whether it committed
    pub success: bool,
    /// Time spent running it
    pub execution_ms: i64,
}

impl From<PgMigrationRecord> for AppliedMigration {
    fn from(row: PgMigrationRecord) -> Self {
        Self {
            version: row.version,
            description: row.description,
            checksum: row.checksum,
            applied_at: row.applied_at,
            success: row.success,
            execution_ms: row.execution_ms,
        }
    }
}

/// Queries against the ledger table.
///
/// The table name comes from a validated [`PgMigratorConfig`](crate::PgMigratorConfig)
/// and is interpolated into the SQL; everything else is bound.
#[derive(Debug, Clone)]
pub struct PgLedger {
    table: String,
}

impl PgLedger {
    /// Creates a ledger over `table`. The name must already be validated.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// The ledger table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the ledger table if it does not exist.
    pub async fn ensure_table<'a, E>(&self, executor: E) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'a>,
    {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                checksum VARCHAR(64) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                success BOOLEAN NOT NULL,
                execution_ms BIGINT NOT NULL DEFAULT 0
            )
            "#,
            self.table
        ))
        .execute(executor)
        .await?;

        Ok(())
    }

    /// All records, ascending by version.
    pub async fn fetch_all<'a, E>(&self, executor: E) -> Result<Vec<AppliedMigration>, sqlx::Error>
    where
        E: PgExecutor<'a>,
    {
        let rows: Vec<PgMigrationRecord> = sqlx::query_as(&format!(
            r#"
            SELECT version, description, checksum, applied_at, success, execution_ms
            FROM {}
            ORDER BY version ASC
            "#,
            self.table
        ))
        .fetch_all(executor)
        .await?;

        Ok(rows.into_iter().map(AppliedMigration::from).collect())
    }

    /// Whether `version` has a successful record.
    pub async fn has_applied<'a, E>(&self, version: i64, executor: E) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'a>,
    {
        let row: (bool,) = sqlx::query_as(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE version = $1 AND success)",
            self.table
        ))
        .bind(version)
        .fetch_one(executor)
        .await?;

        Ok(row.0)
    }

    /// Inserts a record, returning the number of rows written.
    ///
    /// A record may overwrite an earlier failed record for the same version.
    /// A successful record is never overwritten; writing over one returns 0.
    pub async fn record<'a, E>(&self, record: &AppliedMigration, executor: E) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'a>,
    {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {table} (version, description, checksum, applied_at, success, execution_ms)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (version) DO UPDATE SET
                description = EXCLUDED.description,
                checksum = EXCLUDED.checksum,
                applied_at = EXCLUDED.applied_at,
                success = EXCLUDED.success,
                execution_ms = EXCLUDED.execution_ms
            WHERE NOT {table}.success
            "#,
            table = self.table
        ))
        .bind(record.version)
        .bind(&record.description)
        .bind(&record.checksum)
        .bind(record.applied_at)
        .bind(record.success)
        .bind(record.execution_ms)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes failed records, returning how many were removed.
    pub async fn remove_failed<'a, E>(&self, executor: E) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'a>,
    {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE NOT success", self.table))
            .execute(executor)
            .await?;

        Ok(result.rows_affected())
    }
}
