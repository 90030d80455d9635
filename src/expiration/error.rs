use thiserror::Error;

use crate::{config::ConfigError, db::DbError};

/// Failures that abort a whole cleanup pass.
///
/// Per-rule failures never surface here; they are recorded in the pass
/// result instead.
#[derive(Debug, Error)]
pub enum ExpirationError {
    #[error("Failed to acquire lock '{name}': {source}")]
    AcquireLock {
        name: String,
        #[source]
        source: DbError,
    },

    #[error("Failed to load expiration rules: {0}")]
    ListRules(#[source] DbError),
}

/// Scheduler lifecycle errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Cannot start the scheduler while the database is read-only or in recovery")]
    HostNotWritable,

    #[error("Failed to check database status: {0}")]
    HostStatus(#[source] DbError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
