//! Batch deleter for one expiration rule.
//!
//! Deletes expired entries in bounded batches until none remain, pausing
//! briefly between batches so concurrent writers on the same collection are
//! not starved. Each batch commits on its own; an error stops the rule but
//! keeps whatever earlier batches removed.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    db::{DbError, ExpiryRepo},
    models::{ExpirationRule, IdentifierError},
};

/// Pause between consecutive batches of one rule.
pub const BATCH_YIELD: Duration = Duration::from_millis(10);

/// Outcome of running one rule to completion (or to shutdown).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleRun {
    pub rows_deleted: u64,
    /// Batches that removed at least one row.
    pub batches: u32,
    /// Shutdown was requested before the rule ran out of expired rows.
    pub interrupted: bool,
}

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("Invalid rule target: {0}")]
    InvalidTarget(#[from] IdentifierError),

    #[error("retention_seconds {0} puts the cutoff out of range")]
    RetentionOutOfRange(i64),

    #[error("Batch {batch} failed after {rows_deleted} rows: {source}")]
    Batch {
        batch: u32,
        rows_deleted: u64,
        #[source]
        source: DbError,
    },
}

impl DeleteError {
    /// Rows committed by earlier batches before the failure.
    pub fn rows_deleted(&self) -> u64 {
        match self {
            DeleteError::InvalidTarget(_) | DeleteError::RetentionOutOfRange(_) => 0,
            DeleteError::Batch { rows_deleted, .. } => *rows_deleted,
        }
    }
}

pub struct BatchDeleter {
    store: Arc<dyn ExpiryRepo>,
    pause: Duration,
}

impl BatchDeleter {
    pub fn new(store: Arc<dyn ExpiryRepo>) -> Self {
        Self {
            store,
            pause: BATCH_YIELD,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Delete every entry of `rule` that is older than its retention as of `now`.
    ///
    /// The cutoff is computed once. Cancellation is observed between batches,
    /// never in the middle of one.
    pub async fn run(
        &self,
        rule: &ExpirationRule,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<RuleRun, DeleteError> {
        let target = rule.target()?;
        let cutoff = rule
            .cutoff(now)
            .ok_or(DeleteError::RetentionOutOfRange(rule.retention_seconds))?;
        let limit = rule.batch_size.max(1);
        let mut run = RuleRun::default();

        loop {
            let deleted = self
                .store
                .delete_batch(&target, cutoff, limit)
                .await
                .map_err(|source| DeleteError::Batch {
                    batch: run.batches + 1,
                    rows_deleted: run.rows_deleted,
                    source,
                })?;

            if deleted == 0 {
                break;
            }

            run.rows_deleted += deleted;
            run.batches += 1;

            tracing::trace!(
                collection = %target.collection,
                time_field = %target.time_field,
                batch = run.batches,
                deleted,
                "Deleted batch"
            );

            // A short batch means nothing older than the cutoff is left
            if deleted < u64::from(limit) {
                break;
            }

            if cancel.is_cancelled() {
                run.interrupted = true;
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    run.interrupted = true;
                    break;
                }
                _ = tokio::time::sleep(self.pause) => {}
            }
        }

        Ok(run)
    }
}
