mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// PostgreSQL pool configuration with optional read replica.
#[cfg(feature = "database-postgres")]
pub struct PgPoolPair {
    /// Primary pool for writes, deletes and locks.
    pub write: sqlx::PgPool,
    /// Optional read replica pool. If None, reads use the write pool.
    pub read: Option<sqlx::PgPool>,
}

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    rules: Arc<dyn RuleRepo>,
    expiry: Arc<dyn ExpiryRepo>,
    locks: Arc<dyn LockRepo>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(PgPoolPair),
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _None(std::convert::Infallible),
}

/// Database pool supporting both SQLite and PostgreSQL.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    inner: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool with the default lock lease.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        Self::from_sqlite_with_lease(
            pool,
            std::time::Duration::from_secs(crate::config::DEFAULT_LOCK_LEASE_SECS),
        )
    }

    /// Create a DbPool from an existing SQLite pool.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite_with_lease(pool: sqlx::SqlitePool, lease: std::time::Duration) -> Self {
        let repos = CachedRepos {
            rules: Arc::new(sqlite::SqliteRuleRepo::new(pool.clone())),
            expiry: Arc::new(sqlite::SqliteExpiryRepo::new(pool.clone())),
            locks: Arc::new(sqlite::SqliteLockRepo::new(pool.clone(), lease)),
        };
        DbPool {
            inner: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    /// Create a DbPool from existing PostgreSQL pools.
    /// Primarily useful for testing.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(write_pool: sqlx::PgPool, read_pool: Option<sqlx::PgPool>) -> Self {
        let repos = CachedRepos {
            rules: Arc::new(postgres::PostgresRuleRepo::new(
                write_pool.clone(),
                read_pool.clone(),
            )),
            expiry: Arc::new(postgres::PostgresExpiryRepo::new(write_pool.clone())),
            locks: Arc::new(postgres::PostgresLockRepo::new(write_pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Postgres(PgPoolPair {
                write: write_pool,
                read: read_pool,
            }),
            repos,
        }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                Ok(Self::from_sqlite_with_lease(pool, cfg.lock_lease()))
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let write_pool = connect_postgres(cfg, &cfg.url).await?;

                let read_pool = if let Some(read_url) = &cfg.read_url {
                    tracing::info!("Configuring read replica pool");
                    Some(connect_postgres(cfg, read_url).await?)
                } else {
                    None
                };

                Ok(Self::from_postgres(write_pool, read_pool))
            }
        }
    }

    /// Run database migrations.
    ///
    /// This automatically creates and manages a _sqlx_migrations table
    /// Migrations always run on the primary (write) pool.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                tracing::info!("Running PostgreSQL migrations");
                sqlx::migrate!("./migrations_sqlx/postgres")
                    .run(&pools.write)
                    .await?;
                tracing::info!("PostgreSQL migrations completed successfully");
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    /// Get rule registry repository
    pub fn rules(&self) -> Arc<dyn RuleRepo> {
        Arc::clone(&self.repos.rules)
    }

    /// Get expiry (batch delete / index) repository
    pub fn expiry(&self) -> Arc<dyn ExpiryRepo> {
        Arc::clone(&self.repos.expiry)
    }

    /// Get single-flight lock repository
    pub fn locks(&self) -> Arc<dyn LockRepo> {
        Arc::clone(&self.repos.locks)
    }

    /// Whether the primary accepts writes.
    ///
    /// A PostgreSQL standby in recovery, or a SQLite connection with
    /// `query_only` set, reports false.
    pub async fn is_writable(&self) -> DbResult<bool> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                let query_only: i64 = sqlx::query_scalar("PRAGMA query_only")
                    .fetch_one(pool)
                    .await?;
                Ok(query_only == 0)
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pools) => {
                let writable: bool = sqlx::query_scalar("SELECT NOT pg_is_in_recovery()")
                    .fetch_one(&pools.write)
                    .await?;
                Ok(writable)
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}

#[cfg(feature = "database-postgres")]
async fn connect_postgres(
    cfg: &crate::config::PostgresConfig,
    url: &str,
) -> DbResult<sqlx::PgPool> {
    use std::{str::FromStr, time::Duration};

    let options =
        sqlx::postgres::PgConnectOptions::from_str(url)?.ssl_mode(cfg.ssl_mode.into());

    let pool = sqlx::postgres::PgPoolOptions::new()
        .min_connections(cfg.min_connections)
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
        .connect_with(options)
        .await?;

    Ok(pool)
}
