use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{
    error::{DbError, DbResult},
    repos::LockRepo,
};

/// Lease-based lock on the `ttl_locks` table.
///
/// SQLite has no session-scoped advisory locks, so each acquisition is a
/// lease that expires after `lease`. A holder that dies without releasing
/// blocks others for at most one lease. Live holders keep it with [`LockRepo::renew`].
pub struct SqliteLockRepo {
    pool: SqlitePool,
    holder: String,
    lease: Duration,
}

impl SqliteLockRepo {
    pub fn new(pool: SqlitePool, lease: Duration) -> Self {
        Self {
            pool,
            holder: Uuid::new_v4().to_string(),
            lease,
        }
    }

    /// When a lease taken or renewed at `from` runs out.
    fn lease_end(&self, from: DateTime<Utc>) -> DbResult<DateTime<Utc>> {
        chrono::Duration::from_std(self.lease)
            .ok()
            .and_then(|lease| from.checked_add_signed(lease))
            .ok_or_else(|| DbError::Validation(format!("Invalid lock lease: {:?}", self.lease)))
    }
}

#[async_trait]
impl LockRepo for SqliteLockRepo {
    async fn try_acquire(&self, name: &str) -> DbResult<bool> {
        let now = Utc::now();
        let expires_at = self.lease_end(now)?;

        // The update only fires when the existing row's lease has run out
        let result = sqlx::query(
            r#"
            INSERT INTO ttl_locks (name, holder, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE julianday(ttl_locks.expires_at) <= julianday(excluded.acquired_at)
            "#,
        )
        .bind(name)
        .bind(&self.holder)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn renew(&self, name: &str) -> DbResult<bool> {
        let expires_at = self.lease_end(Utc::now())?;

        let result = sqlx::query("UPDATE ttl_locks SET expires_at = ? WHERE name = ? AND holder = ?")
            .bind(expires_at)
            .bind(name)
            .bind(&self.holder)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// A third of the lease, so two renewals can fail before it runs out.
    fn renew_interval(&self) -> Option<Duration> {
        Some(self.lease / 3).filter(|every| !every.is_zero())
    }

    async fn release(&self, name: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM ttl_locks WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(&self.holder)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
