use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{ExpiryRepo, time_index_name},
    },
    models::{CollectionRef, DeleteTarget, Identifier},
};

/// Column types a rule's time field may have.
const TEMPORAL_TYPES: &[&str] = &[
    "timestamp without time zone",
    "timestamp with time zone",
    "date",
];

pub struct PostgresExpiryRepo {
    write_pool: PgPool,
}

impl PostgresExpiryRepo {
    pub fn new(write_pool: PgPool) -> Self {
        Self { write_pool }
    }
}

#[async_trait]
impl ExpiryRepo for PostgresExpiryRepo {
    async fn delete_batch(
        &self,
        target: &DeleteTarget,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<u64> {
        let table = target.collection.quoted();
        let field = target.time_field.quoted();

        // PostgreSQL efficient batched deletion using ctid
        let query = format!(
            r#"
            DELETE FROM {table}
            WHERE ctid IN (
                SELECT ctid FROM {table}
                WHERE {field} < $1
                LIMIT $2
            )
            "#
        );

        let result = sqlx::query(&query)
            .bind(cutoff)
            .bind(i64::from(limit))
            .execute(&self.write_pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn time_field_is_temporal(
        &self,
        collection: &CollectionRef,
        field: &Identifier,
    ) -> DbResult<bool> {
        let data_type: Option<String> = sqlx::query_scalar(
            r#"
            SELECT data_type::text FROM information_schema.columns
            WHERE table_schema = COALESCE($1, current_schema())
              AND table_name = $2
              AND column_name = $3
            "#,
        )
        .bind(collection.schema.as_ref().map(Identifier::as_str))
        .bind(collection.name.as_str())
        .bind(field.as_str())
        .fetch_optional(&self.write_pool)
        .await?;

        Ok(data_type.is_some_and(|ty| TEMPORAL_TYPES.contains(&ty.as_str())))
    }

    async fn create_time_index(
        &self,
        collection: &CollectionRef,
        field: &Identifier,
    ) -> DbResult<String> {
        let name = time_index_name(collection, field)
            .map_err(|e| DbError::Validation(e.to_string()))?;

        let query = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            name.quoted(),
            collection.quoted(),
            field.quoted()
        );
        sqlx::query(&query).execute(&self.write_pool).await?;

        // The index lives in the table's schema
        let index = CollectionRef {
            schema: collection.schema.clone(),
            name,
        };
        Ok(index.to_string())
    }

    async fn drop_index(&self, index_ref: &str) -> DbResult<()> {
        let index =
            CollectionRef::parse(index_ref).map_err(|e| DbError::Validation(e.to_string()))?;

        let query = format!("DROP INDEX IF EXISTS {}", index.quoted());
        sqlx::query(&query).execute(&self.write_pool).await?;

        Ok(())
    }
}
