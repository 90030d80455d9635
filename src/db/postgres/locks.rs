use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, PgPool};
use tokio::sync::Mutex;

use crate::db::{error::DbResult, repos::LockRepo};

/// Session-level advisory locks.
///
/// Each held lock owns a connection detached from the pool, so the server
/// drops the lock when that session ends for any reason.
pub struct PostgresLockRepo {
    write_pool: PgPool,
    held: Mutex<HashMap<String, PgConnection>>,
}

impl PostgresLockRepo {
    pub fn new(write_pool: PgPool) -> Self {
        Self {
            write_pool,
            held: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LockRepo for PostgresLockRepo {
    async fn try_acquire(&self, name: &str) -> DbResult<bool> {
        let mut held = self.held.lock().await;
        // Advisory locks are re-entrant per session; refuse a second holder in-process
        if held.contains_key(name) {
            return Ok(false);
        }

        let mut conn = self.write_pool.acquire().await?.detach();
        let acquired: bool =
            sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
                .bind(name)
                .fetch_one(&mut conn)
                .await?;

        if acquired {
            held.insert(name.to_string(), conn);
        } else if let Err(e) = conn.close().await {
            tracing::debug!(lock = %name, error = %e, "Failed to close lock connection");
        }

        Ok(acquired)
    }

    async fn renew(&self, name: &str) -> DbResult<bool> {
        // Session locks do not expire while the connection is open
        Ok(self.held.lock().await.contains_key(name))
    }

    async fn release(&self, name: &str) -> DbResult<()> {
        let Some(mut conn) = self.held.lock().await.remove(name) else {
            return Ok(());
        };

        // On error the connection is dropped, which ends the session and frees the lock
        let _: bool = sqlx::query_scalar("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
            .bind(name)
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;

        Ok(())
    }
}
