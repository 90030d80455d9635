use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::DbResult,
    models::{CollectionRef, DeleteTarget, Identifier, IdentifierError, MAX_IDENTIFIER_LENGTH},
};

/// Access to the collections that expiration rules point at.
#[async_trait]
pub trait ExpiryRepo: Send + Sync {
    /// Delete up to `limit` entries whose time field is strictly before `cutoff`.
    ///
    /// Each call is its own committed unit of work. Returns the number of rows
    /// actually deleted.
    async fn delete_batch(
        &self,
        target: &DeleteTarget,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<u64>;

    /// Whether `field` exists on `collection` and holds a date or timestamp.
    async fn time_field_is_temporal(
        &self,
        collection: &CollectionRef,
        field: &Identifier,
    ) -> DbResult<bool>;

    /// Create an index on the time field and return its (schema-qualified) name.
    async fn create_time_index(
        &self,
        collection: &CollectionRef,
        field: &Identifier,
    ) -> DbResult<String>;

    /// Drop an index previously returned by [`ExpiryRepo::create_time_index`].
    async fn drop_index(&self, index_ref: &str) -> DbResult<()>;
}

/// Deterministic index name for a rule's time field.
///
/// Truncated to the identifier limit.
pub fn time_index_name(
    collection: &CollectionRef,
    field: &Identifier,
) -> Result<Identifier, IdentifierError> {
    let mut name = format!("ttl_idx_{}_{}", collection.name, field);
    name.truncate(MAX_IDENTIFIER_LENGTH);
    Identifier::parse(&name)
}
