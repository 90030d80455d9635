//! Cleanup pass orchestrator.
//!
//! One pass walks every active rule in key order under the single-flight
//! lock. Each rule runs inside its own failure boundary: a rule that errors
//! is reported in the result and keeps its old statistics, and the pass moves
//! on to the next rule.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{BatchDeleter, ExpirationError, SingleFlight};
use crate::{
    db::{DbPool, ExpiryRepo, LockRepo, RuleRepo},
    models::{ExpirationRule, RuleKey},
    observability::metrics::{self, PassOutcome},
};

/// Why a pass did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoActiveRules,
    /// Another sweeper holds the single-flight lock.
    LockHeld,
}

/// What happened to one rule during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    pub rule_key: RuleKey,
    /// Rows removed, including batches committed before a failure.
    pub rows_deleted: u64,
    pub batches: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RuleOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Results from a single cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupPassResult {
    pub started_at: DateTime<Utc>,
    pub total_rows_deleted: u64,
    /// One entry per processed rule, in processing order.
    pub per_rule_outcomes: Vec<RuleOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    /// Shutdown or a lost lock lease cut the pass short.
    pub interrupted: bool,
    pub duration_ms: u64,
}

impl CleanupPassResult {
    fn skipped(started_at: DateTime<Utc>, reason: SkipReason) -> Self {
        Self {
            started_at,
            total_rows_deleted: 0,
            per_rule_outcomes: Vec::new(),
            skipped: Some(reason),
            interrupted: false,
            duration_ms: 0,
        }
    }

    /// Check if any records were deleted.
    pub fn has_deletions(&self) -> bool {
        self.total_rows_deleted > 0
    }

    pub fn failed_rules(&self) -> usize {
        self.per_rule_outcomes
            .iter()
            .filter(|o| !o.is_success())
            .count()
    }
}

pub struct CleanupPass {
    rules: Arc<dyn RuleRepo>,
    locks: Arc<dyn LockRepo>,
    deleter: BatchDeleter,
}

impl CleanupPass {
    pub fn new(
        rules: Arc<dyn RuleRepo>,
        store: Arc<dyn ExpiryRepo>,
        locks: Arc<dyn LockRepo>,
    ) -> Self {
        Self {
            rules,
            locks,
            deleter: BatchDeleter::new(store),
        }
    }

    pub fn from_pool(db: &DbPool) -> Self {
        Self::new(db.rules(), db.expiry(), db.locks())
    }

    /// Override the pause between batches.
    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.deleter = self.deleter.with_pause(pause);
        self
    }

    /// Run one pass to completion.
    pub async fn run_one_pass(&self, lock_name: &str) -> Result<CleanupPassResult, ExpirationError> {
        self.run(lock_name, &CancellationToken::new()).await
    }

    /// Run one pass, stopping after the in-flight batch once `cancel` fires.
    ///
    /// Only orchestrator-level failures (lock acquisition, rule enumeration)
    /// are returned as errors.
    pub async fn run(
        &self,
        lock_name: &str,
        cancel: &CancellationToken,
    ) -> Result<CleanupPassResult, ExpirationError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let result = self.execute(lock_name, started_at, cancel).await;
        let elapsed = clock.elapsed();

        match result {
            Ok(mut result) => {
                if result.skipped.is_some() {
                    metrics::record_pass(PassOutcome::Skipped, 0.0);
                    return Ok(result);
                }

                result.duration_ms = elapsed.as_millis() as u64;
                metrics::record_pass(PassOutcome::Completed, elapsed.as_secs_f64());

                if result.has_deletions() || result.failed_rules() > 0 {
                    tracing::info!(
                        rules = result.per_rule_outcomes.len(),
                        failed_rules = result.failed_rules(),
                        rows_deleted = result.total_rows_deleted,
                        interrupted = result.interrupted,
                        duration_ms = result.duration_ms,
                        "Cleanup pass complete"
                    );
                } else {
                    tracing::debug!(
                        rules = result.per_rule_outcomes.len(),
                        "Cleanup pass complete, no expired rows"
                    );
                }
                Ok(result)
            }
            Err(e) => {
                metrics::record_pass(PassOutcome::Failed, elapsed.as_secs_f64());
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        lock_name: &str,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CleanupPassResult, ExpirationError> {
        // Checked before locking so idle sweepers do not churn the lock
        let active = self
            .rules
            .count_active()
            .await
            .map_err(ExpirationError::ListRules)?;
        if active == 0 {
            tracing::debug!("No active expiration rules, skipping pass");
            return Ok(CleanupPassResult::skipped(
                started_at,
                SkipReason::NoActiveRules,
            ));
        }

        // Cancelled by shutdown, or by the guard if the lease cannot be renewed
        let pass_cancel = cancel.child_token();
        let guard = SingleFlight::new(Arc::clone(&self.locks), lock_name)
            .cancel_on_loss(pass_cancel.clone());
        let Some(lease) = guard.try_enter().await? else {
            tracing::debug!(lock = %guard.name(), "Lock held by another sweeper, skipping pass");
            return Ok(CleanupPassResult::skipped(started_at, SkipReason::LockHeld));
        };

        let processed = self.process_rules(started_at, &pass_cancel).await;

        if let Err(e) = lease.release().await {
            tracing::warn!(lock = %guard.name(), error = %e, "Failed to release lock");
        }

        let (per_rule_outcomes, interrupted) = processed?;
        Ok(CleanupPassResult {
            started_at,
            total_rows_deleted: per_rule_outcomes.iter().map(|o| o.rows_deleted).sum(),
            per_rule_outcomes,
            skipped: None,
            interrupted,
            duration_ms: 0,
        })
    }

    async fn process_rules(
        &self,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<RuleOutcome>, bool), ExpirationError> {
        let rules = self
            .rules
            .list_active()
            .await
            .map_err(ExpirationError::ListRules)?;

        let mut outcomes = Vec::with_capacity(rules.len());
        for rule in &rules {
            if cancel.is_cancelled() {
                tracing::info!(
                    remaining = rules.len() - outcomes.len(),
                    "Pass cancelled, stopping before remaining rules"
                );
                return Ok((outcomes, true));
            }

            let (outcome, interrupted) = self.process_rule(rule, started_at, cancel).await;
            outcomes.push(outcome);
            if interrupted {
                return Ok((outcomes, true));
            }
        }

        Ok((outcomes, false))
    }

    async fn process_rule(
        &self,
        rule: &ExpirationRule,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> (RuleOutcome, bool) {
        let rule_key = rule.key();
        tracing::debug!(
            collection = %rule.collection_id,
            time_field = %rule.time_field,
            retention_seconds = rule.retention_seconds,
            batch_size = rule.batch_size,
            "Processing expiration rule"
        );

        let run = match self.deleter.run(rule, Utc::now(), cancel).await {
            Ok(run) => run,
            Err(e) => {
                let rows_deleted = e.rows_deleted();
                tracing::warn!(
                    collection = %rule.collection_id,
                    time_field = %rule.time_field,
                    rows_deleted,
                    error = %e,
                    "Expiration rule failed"
                );
                metrics::record_rule_error(&rule.collection_id);
                metrics::record_rows_deleted(&rule.collection_id, rows_deleted);
                let outcome = RuleOutcome {
                    rule_key,
                    rows_deleted,
                    batches: 0,
                    error: Some(e.to_string()),
                };
                return (outcome, false);
            }
        };

        metrics::record_rows_deleted(&rule.collection_id, run.rows_deleted);

        let error = match self
            .rules
            .update_stats(&rule_key, started_at, run.rows_deleted, run.rows_deleted)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    collection = %rule.collection_id,
                    time_field = %rule.time_field,
                    rows_deleted = run.rows_deleted,
                    error = %e,
                    "Failed to record rule statistics"
                );
                metrics::record_rule_error(&rule.collection_id);
                Some(format!("Failed to record statistics: {e}"))
            }
        };

        if run.rows_deleted > 0 {
            tracing::debug!(
                collection = %rule.collection_id,
                time_field = %rule.time_field,
                rows_deleted = run.rows_deleted,
                batches = run.batches,
                "Deleted expired rows"
            );
        }

        let outcome = RuleOutcome {
            rule_key,
            rows_deleted: run.rows_deleted,
            batches: run.batches,
            error,
        };
        (outcome, run.interrupted)
    }
}
