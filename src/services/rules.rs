use std::sync::Arc;

use thiserror::Error;

use crate::{
    db::{DbError, DbPool, ExpiryRepo, RuleRepo},
    models::{
        CollectionRef, DEFAULT_BATCH_SIZE, ExpirationRule, Identifier, IdentifierError,
        MAX_RETENTION_SECONDS, RuleKey, UpsertRule,
    },
};

#[derive(Debug, Error)]
pub enum RuleServiceError {
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error("retention_seconds must be between 0 and {max}, got {0}", max = MAX_RETENTION_SECONDS)]
    InvalidRetention(i64),

    #[error("batch_size must be at least 1")]
    InvalidBatchSize,

    #[error("Column {collection}.{field} must be a date or timestamp")]
    NotTemporal { collection: String, field: String },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Service layer for registering and managing expiration rules
#[derive(Clone)]
pub struct RuleService {
    rules: Arc<dyn RuleRepo>,
    store: Arc<dyn ExpiryRepo>,
}

impl RuleService {
    pub fn new(rules: Arc<dyn RuleRepo>, store: Arc<dyn ExpiryRepo>) -> Self {
        Self { rules, store }
    }

    pub fn from_pool(db: &DbPool) -> Self {
        Self::new(db.rules(), db.expiry())
    }

    /// Register a rule, or update retention and batch size of an existing one.
    ///
    /// The time field must exist and hold a date or timestamp. An index on it
    /// is created if missing. Re-registering reactivates a deactivated rule
    /// and keeps its statistics.
    pub async fn register(
        &self,
        collection: &str,
        time_field: &str,
        retention_seconds: i64,
        batch_size: Option<u32>,
    ) -> Result<ExpirationRule, RuleServiceError> {
        let collection = CollectionRef::parse(collection)?;
        let time_field = Identifier::parse(time_field)?;
        if !(0..=MAX_RETENTION_SECONDS).contains(&retention_seconds) {
            return Err(RuleServiceError::InvalidRetention(retention_seconds));
        }
        let batch_size = batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(RuleServiceError::InvalidBatchSize);
        }

        if !self
            .store
            .time_field_is_temporal(&collection, &time_field)
            .await?
        {
            return Err(RuleServiceError::NotTemporal {
                collection: collection.to_string(),
                field: time_field.to_string(),
            });
        }

        let index_ref = self
            .store
            .create_time_index(&collection, &time_field)
            .await?;

        let mut rule = self
            .rules
            .upsert(UpsertRule {
                collection,
                time_field,
                retention_seconds,
                batch_size,
            })
            .await?;

        self.rules
            .set_index_ref(&rule.key(), Some(&index_ref))
            .await?;
        rule.derived_index_ref = Some(index_ref);

        tracing::info!(
            collection = %rule.collection_id,
            time_field = %rule.time_field,
            retention_seconds = rule.retention_seconds,
            batch_size = rule.batch_size,
            "Registered expiration rule"
        );

        Ok(rule)
    }

    /// Deactivate a rule, keeping its configuration. Returns false if no such rule.
    pub async fn deactivate(&self, key: &RuleKey) -> Result<bool, RuleServiceError> {
        let changed = self.rules.set_active(key, false).await?;
        if changed {
            tracing::info!(rule = %key, "Deactivated expiration rule");
        }
        Ok(changed)
    }

    /// Delete a rule and drop its derived index.
    ///
    /// Returns the removed rule, or `None` if it did not exist. Failing to drop
    /// the index is logged and does not fail the removal.
    pub async fn remove(&self, key: &RuleKey) -> Result<Option<ExpirationRule>, RuleServiceError> {
        let Some(rule) = self.rules.remove(key).await? else {
            return Ok(None);
        };

        if let Some(index_ref) = &rule.derived_index_ref
            && let Err(e) = self.store.drop_index(index_ref).await
        {
            tracing::warn!(
                rule = %key,
                index = %index_ref,
                error = %e,
                "Failed to drop index for removed rule"
            );
        }

        tracing::info!(rule = %key, "Removed expiration rule");
        Ok(Some(rule))
    }

    /// Zero a rule's statistics. Returns false if no such rule.
    pub async fn reset_stats(&self, key: &RuleKey) -> Result<bool, RuleServiceError> {
        Ok(self.rules.reset_stats(key).await?)
    }

    /// List rules ordered by key
    pub async fn list(&self, include_inactive: bool) -> Result<Vec<ExpirationRule>, RuleServiceError> {
        Ok(self.rules.list(include_inactive).await?)
    }
}
