//! PostgreSQL implementation of [`EntityStore`].
//!
//! User entity schemas aren't known until config load (§1 non-goal: "a query
//! language over entities" and codegen are both out of core scope), so
//! rather than generating one physical table per declared entity, every row
//! of every entity table lives in the single `entity_rows` table from
//! `migrations/0002_entity_store.sql`, versioned by the checkpoint it was
//! written at. `revert` deletes versions created after the target checkpoint
//! and un-deletes versions deleted after it, mirroring
//! [`crate::ports::entity_store::InMemoryEntityStore`]'s append-only
//! versioning but backed by durable storage.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Row};
use tracing::instrument;

use crate::core::Checkpoint;
use crate::error::{InfraError, Result};
use crate::ports::entity_store::{EntityStore, EntityValue};

/// PostgreSQL-backed [`EntityStore`].
#[derive(Debug, Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct EntityRow {
    data: serde_json::Value,
}

fn row_id_of(table: &str, id: &Value) -> String {
    let _ = table;
    id.to_string()
}

fn entity_value_from_json(value: Value) -> EntityValue {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => EntityValue::new(),
    }
}

impl PostgresEntityStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    #[instrument(skip(self))]
    async fn find_unique(
        &self,
        table: &str,
        id: &Value,
        checkpoint: Checkpoint,
    ) -> Result<Option<EntityValue>> {
        let row_id = row_id_of(table, id);
        let key = checkpoint.sort_key();
        let row = sqlx::query_as::<_, EntityRow>(
            r"
            SELECT data FROM entity_rows
            WHERE table_name = $1 AND row_id = $2 AND created_key <= $3
              AND (deleted_key IS NULL OR deleted_key > $3)
            ORDER BY created_key DESC
            LIMIT 1
            ",
        )
        .bind(table)
        .bind(&row_id)
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(row.map(|r| entity_value_from_json(r.data)))
    }

    #[instrument(skip(self, filter))]
    async fn find_many(
        &self,
        table: &str,
        filter: &EntityValue,
        checkpoint: Checkpoint,
    ) -> Result<Vec<EntityValue>> {
        let key = checkpoint.sort_key();
        let rows = sqlx::query(
            r"
            SELECT DISTINCT ON (row_id) row_id, data, created_key FROM entity_rows
            WHERE table_name = $1 AND created_key <= $2
              AND (deleted_key IS NULL OR deleted_key > $2)
            ORDER BY row_id, created_key DESC
            ",
        )
        .bind(table)
        .bind(&key)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let data: serde_json::Value = row.try_get("data").ok()?;
                let value = entity_value_from_json(data);
                filter
                    .iter()
                    .all(|(k, v)| value.get(k) == Some(v))
                    .then_some(value)
            })
            .collect())
    }

    #[instrument(skip(self, row))]
    async fn create(&self, table: &str, row: EntityValue, checkpoint: Checkpoint) -> Result<()> {
        let Some(id) = row.get("id") else {
            return Err(InfraError::NonRetryable(format!("entity row for {table} has no \"id\" field")).into());
        };
        let row_id = row_id_of(table, id);
        let key = checkpoint.sort_key();
        let data = Value::Object(row.into_iter().collect());
        sqlx::query(
            r"
            INSERT INTO entity_rows (table_name, row_id, data, created_key, deleted_key)
            VALUES ($1, $2, $3, $4, NULL)
            ",
        )
        .bind(table)
        .bind(&row_id)
        .bind(&data)
        .bind(&key)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn update(
        &self,
        table: &str,
        id: &Value,
        patch: EntityValue,
        checkpoint: Checkpoint,
    ) -> Result<()> {
        let existing = self.find_unique(table, id, checkpoint).await?;
        let Some(mut merged) = existing else {
            return Err(InfraError::NotFound.into());
        };
        merged.extend(patch);
        self.create(table, merged, checkpoint).await
    }

    #[instrument(skip(self, row))]
    async fn upsert(&self, table: &str, row: EntityValue, checkpoint: Checkpoint) -> Result<()> {
        self.create(table, row, checkpoint).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, table: &str, id: &Value, checkpoint: Checkpoint) -> Result<()> {
        let row_id = row_id_of(table, id);
        let key = checkpoint.sort_key();
        sqlx::query(
            r"
            UPDATE entity_rows SET deleted_key = $3
            WHERE table_name = $1 AND row_id = $2 AND deleted_key IS NULL
            ",
        )
        .bind(table)
        .bind(&row_id)
        .bind(&key)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn revert(&self, checkpoint: Checkpoint) -> Result<()> {
        let key = checkpoint.sort_key();
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        sqlx::query("DELETE FROM entity_rows WHERE created_key > $1")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        sqlx::query("UPDATE entity_rows SET deleted_key = NULL WHERE deleted_key > $1")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }
}
