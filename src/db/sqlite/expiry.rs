use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{ExpiryRepo, time_index_name},
    },
    models::{CollectionRef, DeleteTarget, Identifier},
};

/// Sort key of a time field.
///
/// `julianday()` normalises both `YYYY-MM-DD HH:MM:SS` and RFC 3339 text.
/// The delete predicate and the derived index must use the same expression
/// for the index to be eligible.
fn time_key(field: &Identifier) -> String {
    format!("julianday({})", field.quoted())
}

/// Delete statement for one batch. Binds the cutoff, then the limit.
pub(crate) fn delete_batch_query(target: &DeleteTarget) -> String {
    let table = target.collection.quoted();
    let key = time_key(&target.time_field);

    format!(
        r#"
        DELETE FROM {table}
        WHERE rowid IN (
            SELECT rowid FROM {table}
            WHERE {key} < julianday(?)
            LIMIT ?
        )
        "#
    )
}

pub struct SqliteExpiryRepo {
    pool: SqlitePool,
}

impl SqliteExpiryRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExpiryRepo for SqliteExpiryRepo {
    async fn delete_batch(
        &self,
        target: &DeleteTarget,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<u64> {
        let query = delete_batch_query(target);

        let result = sqlx::query(&query)
            .bind(cutoff)
            .bind(i64::from(limit))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn time_field_is_temporal(
        &self,
        collection: &CollectionRef,
        field: &Identifier,
    ) -> DbResult<bool> {
        let declared: Option<String> = match &collection.schema {
            Some(schema) => {
                sqlx::query_scalar("SELECT type FROM pragma_table_info(?, ?) WHERE name = ?")
                    .bind(collection.name.as_str())
                    .bind(schema.as_str())
                    .bind(field.as_str())
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT type FROM pragma_table_info(?) WHERE name = ?")
                    .bind(collection.name.as_str())
                    .bind(field.as_str())
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        Ok(declared.is_some_and(|ty| {
            let ty = ty.to_ascii_uppercase();
            ty.contains("DATE") || ty.contains("TIME")
        }))
    }

    async fn create_time_index(
        &self,
        collection: &CollectionRef,
        field: &Identifier,
    ) -> DbResult<String> {
        let name = time_index_name(collection, field)
            .map_err(|e| DbError::Validation(e.to_string()))?;

        // SQLite qualifies the index name, not the table
        let index = CollectionRef {
            schema: collection.schema.clone(),
            name,
        };

        let query = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            index.quoted(),
            collection.name.quoted(),
            time_key(field)
        );
        sqlx::query(&query).execute(&self.pool).await?;

        Ok(index.to_string())
    }

    async fn drop_index(&self, index_ref: &str) -> DbResult<()> {
        let index =
            CollectionRef::parse(index_ref).map_err(|e| DbError::Validation(e.to_string()))?;

        let query = format!("DROP INDEX IF EXISTS {}", index.quoted());
        sqlx::query(&query).execute(&self.pool).await?;

        Ok(())
    }
}
