use sqlx::PgConnection;

/// A session-level PostgreSQL advisory lock identified by name.
///
/// The name is hashed with md5 into two int4 keys (64-bit key space). Session
/// locks survive transaction rollbacks and are released by
/// [`AdvisoryLock::release`] or when the connection closes, so acquire and
/// release must happen on the same connection.
#[derive(Debug, Clone)]
pub struct AdvisoryLock {
    name: String,
}

impl AdvisoryLock {
    /// Creates a lock handle for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until the lock is acquired on `conn`.
    pub async fn acquire(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            SELECT pg_advisory_lock(
                ('x' || substr(md5($1), 1, 8))::bit(32)::int,
                ('x' || substr(md5($1), 9, 8))::bit(32)::int
            )
            "#,
        )
        .bind(&self.name)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Attempts to acquire the lock without waiting.
    ///
    /// Returns `true` if the lock was acquired, `false` otherwise.
    pub async fn try_acquire(&self, conn: &mut PgConnection) -> Result<bool, sqlx::Error> {
        let result: (bool,) = sqlx::query_as(
            r#"
            SELECT pg_try_advisory_lock(
                ('x' || substr(md5($1), 1, 8))::bit(32)::int,
                ('x' || substr(md5($1), 9, 8))::bit(32)::int
            )
            "#,
        )
        .bind(&self.name)
        .fetch_one(conn)
        .await?;

        Ok(result.0)
    }

    /// Releases the lock.
    ///
    /// Returns `true` if the lock was released, `false` if it wasn't held.
    pub async fn release(&self, conn: &mut PgConnection) -> Result<bool, sqlx::Error> {
        let result: (bool,) = sqlx::query_as(
            r#"
            SELECT pg_advisory_unlock(
                ('x' || substr(md5($1), 1, 8))::bit(32)::int,
                ('x' || substr(md5($1), 9, 8))::bit(32)::int
            )
            "#,
        )
        .bind(&self.name)
        .fetch_one(conn)
        .await?;

        Ok(result.0)
    }
}
