use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{RuleRepo, batch_size_from_db, counter_from_db, counter_to_db},
    },
    models::{ExpirationRule, RuleKey, UpsertRule},
};

const RULE_COLUMNS: &str = r#"
    collection_id, time_field, retention_seconds, active, batch_size,
    created_at, updated_at, last_run, rows_deleted_last_run,
    total_rows_deleted, derived_index_ref
"#;

pub struct SqliteRuleRepo {
    pool: SqlitePool,
}

impl SqliteRuleRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> DbResult<ExpirationRule> {
        Ok(ExpirationRule {
            collection_id: row.get("collection_id"),
            time_field: row.get("time_field"),
            retention_seconds: row.get("retention_seconds"),
            active: row.get("active"),
            batch_size: batch_size_from_db(row.get("batch_size"))?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            last_run: row.get("last_run"),
            rows_deleted_last_run: counter_from_db(
                "rows_deleted_last_run",
                row.get("rows_deleted_last_run"),
            )?,
            total_rows_deleted: counter_from_db(
                "total_rows_deleted",
                row.get("total_rows_deleted"),
            )?,
            derived_index_ref: row.get("derived_index_ref"),
        })
    }
}

#[async_trait]
impl RuleRepo for SqliteRuleRepo {
    async fn upsert(&self, input: UpsertRule) -> DbResult<ExpirationRule> {
        let key = input.key();
        let now = Utc::now();

        let query = format!(
            r#"
            INSERT INTO ttl_rules (
                collection_id, time_field, retention_seconds, active, batch_size,
                created_at, updated_at, rows_deleted_last_run, total_rows_deleted
            )
            VALUES (?, ?, ?, 1, ?, ?, ?, 0, 0)
            ON CONFLICT (collection_id, time_field) DO UPDATE SET
                retention_seconds = excluded.retention_seconds,
                batch_size = excluded.batch_size,
                active = 1,
                updated_at = excluded.updated_at
            RETURNING {RULE_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(&key.collection_id)
            .bind(&key.time_field)
            .bind(input.retention_seconds)
            .bind(i64::from(input.batch_size))
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Self::row_to_rule(&row)
    }

    async fn get(&self, key: &RuleKey) -> DbResult<Option<ExpirationRule>> {
        let query = format!(
            "SELECT {RULE_COLUMNS} FROM ttl_rules WHERE collection_id = ? AND time_field = ?"
        );

        let row = sqlx::query(&query)
            .bind(&key.collection_id)
            .bind(&key.time_field)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_rule).transpose()
    }

    async fn list(&self, include_inactive: bool) -> DbResult<Vec<ExpirationRule>> {
        let query = format!(
            r#"
            SELECT {RULE_COLUMNS} FROM ttl_rules
            WHERE active = 1 OR ?
            ORDER BY collection_id, time_field
            "#
        );

        let rows = sqlx::query(&query)
            .bind(include_inactive)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_rule).collect()
    }

    async fn count_active(&self) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ttl_rules WHERE active = 1")
            .fetch_one(&self.pool)
            .await?;

        counter_from_db("count", count)
    }

    async fn set_active(&self, key: &RuleKey, active: bool) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ttl_rules
            SET active = ?, updated_at = ?
            WHERE collection_id = ? AND time_field = ?
            "#,
        )
        .bind(active)
        .bind(Utc::now())
        .bind(&key.collection_id)
        .bind(&key.time_field)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_index_ref(&self, key: &RuleKey, index_ref: Option<&str>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ttl_rules
            SET derived_index_ref = ?
            WHERE collection_id = ? AND time_field = ?
            "#,
        )
        .bind(index_ref)
        .bind(&key.collection_id)
        .bind(&key.time_field)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    async fn remove(&self, key: &RuleKey) -> DbResult<Option<ExpirationRule>> {
        let query = format!(
            r#"
            DELETE FROM ttl_rules
            WHERE collection_id = ? AND time_field = ?
            RETURNING {RULE_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(&key.collection_id)
            .bind(&key.time_field)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_rule).transpose()
    }

    async fn update_stats(
        &self,
        key: &RuleKey,
        last_run: DateTime<Utc>,
        rows_deleted_last_run: u64,
        delta: u64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ttl_rules
            SET last_run = ?,
                rows_deleted_last_run = ?,
                total_rows_deleted = total_rows_deleted + ?
            WHERE collection_id = ? AND time_field = ?
            "#,
        )
        .bind(last_run)
        .bind(counter_to_db(rows_deleted_last_run)?)
        .bind(counter_to_db(delta)?)
        .bind(&key.collection_id)
        .bind(&key.time_field)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    async fn reset_stats(&self, key: &RuleKey) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ttl_rules
            SET last_run = NULL, rows_deleted_last_run = 0, total_rows_deleted = 0,
                updated_at = ?
            WHERE collection_id = ? AND time_field = ?
            "#,
        )
        .bind(Utc::now())
        .bind(&key.collection_id)
        .bind(&key.time_field)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
