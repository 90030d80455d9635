//! Shared tests for RuleRepo implementations

use chrono::{Duration, Utc};

use super::harness::DbTestContext;
use crate::{
    db::DbError,
    models::{CollectionRef, Identifier, RuleKey, UpsertRule},
};

fn upsert_input(collection: &str, field: &str, retention_seconds: i64, batch: u32) -> UpsertRule {
    UpsertRule {
        collection: CollectionRef::parse(collection).expect("valid collection"),
        time_field: Identifier::parse(field).expect("valid field"),
        retention_seconds,
        batch_size: batch,
    }
}

// ============================================================================
// Upsert Tests
// ============================================================================

pub async fn test_upsert_creates_rule(ctx: &DbTestContext) {
    let rules = ctx.pool.rules();

    let rule = rules
        .upsert(upsert_input("orders", "created_at", 3600, 500))
        .await
        .expect("Failed to upsert rule");

    assert_eq!(rule.collection_id, "orders");
    assert_eq!(rule.time_field, "created_at");
    assert_eq!(rule.retention_seconds, 3600);
    assert_eq!(rule.batch_size, 500);
    assert!(rule.active);
    assert!(rule.last_run.is_none());
    assert_eq!(rule.rows_deleted_last_run, 0);
    assert_eq!(rule.total_rows_deleted, 0);
    assert!(rule.derived_index_ref.is_none());
}

pub async fn test_upsert_updates_and_reactivates(ctx: &DbTestContext) {
    let rules = ctx.pool.rules();
    let key = RuleKey::new("orders", "created_at");

    rules
        .upsert(upsert_input("orders", "created_at", 3600, 500))
        .await
        .expect("Failed to upsert rule");
    rules
        .update_stats(&key, Utc::now(), 7, 7)
        .await
        .expect("Failed to update stats");
    rules
        .set_active(&key, false)
        .await
        .expect("Failed to deactivate");

    let updated = rules
        .upsert(upsert_input("orders", "created_at", 60, 10))
        .await
        .expect("Failed to re-register rule");

    assert_eq!(updated.retention_seconds, 60);
    assert_eq!(updated.batch_size, 10);
    assert!(updated.active);
    // Statistics survive re-registration
    assert_eq!(updated.total_rows_deleted, 7);
    assert!(updated.updated_at >= updated.created_at);
}

pub async fn test_same_collection_different_fields(ctx: &DbTestContext) {
    let rules = ctx.pool.rules();

    rules
        .upsert(upsert_input("orders", "created_at", 3600, 100))
        .await
        .expect("Failed to upsert rule");
    rules
        .upsert(upsert_input("orders", "shipped_at", 60, 100))
        .await
        .expect("Failed to upsert rule");

    let all = rules.list(true).await.expect("Failed to list");
    assert_eq!(all.len(), 2);
}

// ============================================================================
// Read Tests
// ============================================================================

pub async fn test_get_not_found(ctx: &DbTestContext) {
    let result = ctx
        .pool
        .rules()
        .get(&RuleKey::new("missing", "created_at"))
        .await
        .expect("Query should succeed");
    assert!(result.is_none());
}

pub async fn test_list_ordered_by_key(ctx: &DbTestContext) {
    let rules = ctx.pool.rules();
    for (collection, field) in [
        ("sessions", "expires_at"),
        ("events", "ts"),
        ("orders", "updated_at"),
        ("orders", "created_at"),
    ] {
        rules
            .upsert(upsert_input(collection, field, 60, 100))
            .await
            .expect("Failed to upsert rule");
    }

    let keys: Vec<RuleKey> = rules
        .list_active()
        .await
        .expect("Failed to list")
        .iter()
        .map(|r| r.key())
        .collect();

    assert_eq!(
        keys,
        vec![
            RuleKey::new("events", "ts"),
            RuleKey::new("orders", "created_at"),
            RuleKey::new("orders", "updated_at"),
            RuleKey::new("sessions", "expires_at"),
        ]
    );
}

pub async fn test_list_excludes_inactive(ctx: &DbTestContext) {
    let rules = ctx.pool.rules();
    rules
        .upsert(upsert_input("orders", "created_at", 60, 100))
        .await
        .expect("Failed to upsert rule");
    rules
        .upsert(upsert_input("events", "ts", 60, 100))
        .await
        .expect("Failed to upsert rule");

    assert!(
        rules
            .set_active(&RuleKey::new("events", "ts"), false)
            .await
            .expect("Failed to deactivate")
    );

    assert_eq!(rules.count_active().await.expect("Failed to count"), 1);
    assert_eq!(rules.list_active().await.expect("Failed to list").len(), 1);
    assert_eq!(rules.list(true).await.expect("Failed to list").len(), 2);
}

pub async fn test_set_active_missing_rule(ctx: &DbTestContext) {
    let changed = ctx
        .pool
        .rules()
        .set_active(&RuleKey::new("missing", "ts"), false)
        .await
        .expect("Query should succeed");
    assert!(!changed);
}

// ============================================================================
// Statistics Tests
// ============================================================================

pub async fn test_update_stats_accumulates(ctx: &DbTestContext) {
    let rules = ctx.pool.rules();
    let key = RuleKey::new("orders", "created_at");
    rules
        .upsert(upsert_input("orders", "created_at", 60, 100))
        .await
        .expect("Failed to upsert rule");

    let first = Utc::now() - Duration::minutes(5);
    let second = Utc::now();
    rules
        .update_stats(&key, first, 3, 3)
        .await
        .expect("Failed to update stats");
    rules
        .update_stats(&key, second, 0, 0)
        .await
        .expect("Failed to update stats");
    rules
        .update_stats(&key, second, 4, 4)
        .await
        .expect("Failed to update stats");

    let rule = rules
        .get(&key)
        .await
        .expect("Failed to get")
        .expect("Rule should exist");
    assert_eq!(rule.rows_deleted_last_run, 4);
    assert_eq!(rule.total_rows_deleted, 7);
    let last_run = rule.last_run.expect("last_run should be set");
    assert!((last_run - second).num_milliseconds().abs() < 1000);
}

pub async fn test_update_stats_missing_rule(ctx: &DbTestContext) {
    let result = ctx
        .pool
        .rules()
        .update_stats(&RuleKey::new("missing", "ts"), Utc::now(), 1, 1)
        .await;
    assert!(matches!(result, Err(DbError::NotFound)));
}

pub async fn test_reset_stats(ctx: &DbTestContext) {
    let rules = ctx.pool.rules();
    let key = RuleKey::new("orders", "created_at");
    rules
        .upsert(upsert_input("orders", "created_at", 60, 100))
        .await
        .expect("Failed to upsert rule");
    rules
        .update_stats(&key, Utc::now(), 9, 9)
        .await
        .expect("Failed to update stats");

    assert!(rules.reset_stats(&key).await.expect("Failed to reset"));

    let rule = rules
        .get(&key)
        .await
        .expect("Failed to get")
        .expect("Rule should exist");
    assert!(rule.last_run.is_none());
    assert_eq!(rule.rows_deleted_last_run, 0);
    assert_eq!(rule.total_rows_deleted, 0);

    assert!(
        !rules
            .reset_stats(&RuleKey::new("missing", "ts"))
            .await
            .expect("Query should succeed")
    );
}

// ============================================================================
// Index Ref / Removal Tests
// ============================================================================

pub async fn test_set_index_ref_and_remove(ctx: &DbTestContext) {
    let rules = ctx.pool.rules();
    let key = RuleKey::new("orders", "created_at");
    rules
        .upsert(upsert_input("orders", "created_at", 60, 100))
        .await
        .expect("Failed to upsert rule");

    rules
        .set_index_ref(&key, Some("ttl_idx_orders_created_at"))
        .await
        .expect("Failed to set index ref");

    let removed = rules
        .remove(&key)
        .await
        .expect("Failed to remove")
        .expect("Rule should have existed");
    assert_eq!(
        removed.derived_index_ref.as_deref(),
        Some("ttl_idx_orders_created_at")
    );

    assert!(rules.get(&key).await.expect("Failed to get").is_none());
    assert!(rules.remove(&key).await.expect("Failed to remove").is_none());
}

pub async fn test_set_index_ref_missing_rule(ctx: &DbTestContext) {
    let result = ctx
        .pool
        .rules()
        .set_index_ref(&RuleKey::new("missing", "ts"), None)
        .await;
    assert!(matches!(result, Err(DbError::NotFound)));
}

// ============================================================================
// SQLite Tests - Fast, in-memory
// ============================================================================

#[cfg(all(test, feature = "database-sqlite"))]
mod sqlite_tests {
    use crate::db::tests::harness::sqlite_context;

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let ctx = sqlite_context().await;
                super::$name(&ctx).await;
            }
        };
    }

    sqlite_test!(test_upsert_creates_rule);
    sqlite_test!(test_upsert_updates_and_reactivates);
    sqlite_test!(test_same_collection_different_fields);
    sqlite_test!(test_get_not_found);
    sqlite_test!(test_list_ordered_by_key);
    sqlite_test!(test_list_excludes_inactive);
    sqlite_test!(test_set_active_missing_rule);
    sqlite_test!(test_update_stats_accumulates);
    sqlite_test!(test_update_stats_missing_rule);
    sqlite_test!(test_reset_stats);
    sqlite_test!(test_set_index_ref_and_remove);
    sqlite_test!(test_set_index_ref_missing_rule);
}

// ============================================================================
// PostgreSQL Tests - Require Docker, run with `cargo test -- --ignored`
// ============================================================================

#[cfg(all(test, feature = "database-postgres"))]
mod postgres_tests {
    use crate::db::tests::harness::postgres_context;

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let ctx = postgres_context().await;
                super::$name(&ctx).await;
            }
        };
    }

    postgres_test!(test_upsert_creates_rule);
    postgres_test!(test_upsert_updates_and_reactivates);
    postgres_test!(test_same_collection_different_fields);
    postgres_test!(test_get_not_found);
    postgres_test!(test_list_ordered_by_key);
    postgres_test!(test_list_excludes_inactive);
    postgres_test!(test_set_active_missing_rule);
    postgres_test!(test_update_stats_accumulates);
    postgres_test!(test_update_stats_missing_rule);
    postgres_test!(test_reset_stats);
    postgres_test!(test_set_index_ref_and_remove);
    postgres_test!(test_set_index_ref_missing_rule);
}
