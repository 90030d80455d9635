use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{CollectionRef, Identifier, IdentifierError};

/// Batch size used when a rule is registered without one.
pub const DEFAULT_BATCH_SIZE: u32 = 10_000;

/// Longest accepted retention window, roughly 68 years.
pub const MAX_RETENTION_SECONDS: i64 = i32::MAX as i64;

/// Unique key of an expiration rule.
///
/// Ordering is `(collection_id, time_field)`, which is also the order rules
/// are processed in during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub collection_id: String,
    pub time_field: String,
}

impl RuleKey {
    pub fn new(collection_id: impl Into<String>, time_field: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            time_field: time_field.into(),
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.collection_id, self.time_field)
    }
}

/// An expiration policy binding one collection and time field to a retention window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationRule {
    pub collection_id: String,
    pub time_field: String,
    /// Entries older than this many seconds are deleted.
    pub retention_seconds: i64,
    /// Inactive rules keep their configuration but are skipped by passes.
    pub active: bool,
    /// Maximum rows removed by a single delete statement.
    pub batch_size: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Start time of the last pass that processed this rule successfully.
    pub last_run: Option<DateTime<Utc>>,
    pub rows_deleted_last_run: u64,
    pub total_rows_deleted: u64,
    /// Name of the index created to speed up lookups on `time_field`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_index_ref: Option<String>,
}

impl ExpirationRule {
    pub fn key(&self) -> RuleKey {
        RuleKey::new(&self.collection_id, &self.time_field)
    }

    /// Entries whose time field is strictly before the returned instant are expired.
    ///
    /// `None` if the retention window reaches outside the representable range.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Duration::try_seconds(self.retention_seconds)
            .and_then(|retention| now.checked_sub_signed(retention))
    }

    /// Typed delete target built from the stored names.
    pub fn target(&self) -> Result<DeleteTarget, IdentifierError> {
        Ok(DeleteTarget {
            collection: CollectionRef::parse(&self.collection_id)?,
            time_field: Identifier::parse(&self.time_field)?,
        })
    }
}

/// Collection and time field a batch delete runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTarget {
    pub collection: CollectionRef,
    pub time_field: Identifier,
}

impl fmt::Display for DeleteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.collection, self.time_field)
    }
}

/// Input for creating or updating a rule.
#[derive(Debug, Clone)]
pub struct UpsertRule {
    pub collection: CollectionRef,
    pub time_field: Identifier,
    pub retention_seconds: i64,
    pub batch_size: u32,
}

impl UpsertRule {
    pub fn key(&self) -> RuleKey {
        RuleKey::new(self.collection.to_string(), self.time_field.as_str())
    }
}
