use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::DbResult,
    models::{ExpirationRule, RuleKey, UpsertRule},
};

/// Durable registry of expiration rules and their run statistics.
///
/// Every method is a single statement, so each call is atomic under the
/// store's own transaction semantics. No in-process locking is involved;
/// several processes may share one registry.
#[async_trait]
pub trait RuleRepo: Send + Sync {
    /// Create a rule, or update retention and batch size of an existing one.
    ///
    /// Re-registering an existing key re-activates it and keeps its statistics.
    async fn upsert(&self, input: UpsertRule) -> DbResult<ExpirationRule>;

    /// Get a rule by key
    async fn get(&self, key: &RuleKey) -> DbResult<Option<ExpirationRule>>;

    /// List rules ordered by `(collection_id, time_field)`.
    async fn list(&self, include_inactive: bool) -> DbResult<Vec<ExpirationRule>>;

    /// Count rules with `active = true`.
    async fn count_active(&self) -> DbResult<u64>;

    /// Active rules in deterministic `(collection_id, time_field)` order.
    async fn list_active(&self) -> DbResult<Vec<ExpirationRule>> {
        self.list(false).await
    }

    /// Flip the `active` flag. Returns false if no such rule exists.
    async fn set_active(&self, key: &RuleKey, active: bool) -> DbResult<bool>;

    /// Record (or clear) the index created for the rule's time field.
    async fn set_index_ref(&self, key: &RuleKey, index_ref: Option<&str>) -> DbResult<()>;

    /// Delete a rule, returning the removed row so callers can release its index.
    async fn remove(&self, key: &RuleKey) -> DbResult<Option<ExpirationRule>>;

    // ==================== Statistics ====================

    /// Write back the outcome of one successful rule run.
    ///
    /// Sets `last_run` and `rows_deleted_last_run`, and adds `delta` to
    /// `total_rows_deleted` in the same statement. Returns `NotFound` if the
    /// rule was removed while the pass was running.
    async fn update_stats(
        &self,
        key: &RuleKey,
        last_run: DateTime<Utc>,
        rows_deleted_last_run: u64,
        delta: u64,
    ) -> DbResult<()>;

    /// Zero both counters and clear `last_run`. Returns false if no such rule exists.
    async fn reset_stats(&self, key: &RuleKey) -> DbResult<bool>;
}
