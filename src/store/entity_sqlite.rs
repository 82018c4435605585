//! SQLite implementation of [`EntityStore`].
//!
//! Mirrors [`super::entity_postgres::PostgresEntityStore`]'s single
//! versioned `entity_rows` table, bootstrapped with `CREATE TABLE IF NOT
//! EXISTS` the same way [`super::sqlite::SqliteSyncStore`] does, with the
//! JSON payload kept as `TEXT` instead of `JSONB`.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, Row};
use tracing::instrument;

use crate::core::Checkpoint;
use crate::error::{InfraError, Result};
use crate::ports::entity_store::{EntityStore, EntityValue};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS entity_rows (
    table_name TEXT NOT NULL,
    row_id TEXT NOT NULL,
    data TEXT NOT NULL,
    created_key TEXT NOT NULL,
    deleted_key TEXT,
    PRIMARY KEY (table_name, row_id, created_key)
);
CREATE INDEX IF NOT EXISTS idx_entity_rows_lookup ON entity_rows (table_name, row_id, created_key);
CREATE INDEX IF NOT EXISTS idx_entity_rows_created ON entity_rows (created_key);
CREATE INDEX IF NOT EXISTS idx_entity_rows_deleted ON entity_rows (deleted_key);
";

/// SQLite-backed [`EntityStore`].
#[derive(Debug, Clone)]
pub struct SqliteEntityStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct EntityRow {
    data: String,
}

fn row_id_of(id: &Value) -> String {
    id.to_string()
}

fn entity_value_from_json(raw: &str) -> EntityValue {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => EntityValue::new(),
    }
}

impl SqliteEntityStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Reference to the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the `entity_rows` table (and indexes) if they don't already
    /// exist.
    ///
    /// # Errors
    /// Returns an error if any statement fails to execute.
    pub async fn run_migrations(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await.map_err(InfraError::Database)?;
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    #[instrument(skip(self))]
    async fn find_unique(
        &self,
        table: &str,
        id: &Value,
        checkpoint: Checkpoint,
    ) -> Result<Option<EntityValue>> {
        let row_id = row_id_of(id);
        let key = checkpoint.sort_key();
        let row = sqlx::query_as::<_, EntityRow>(
            r"
            SELECT data FROM entity_rows
            WHERE table_name = ? AND row_id = ? AND created_key <= ?
              AND (deleted_key IS NULL OR deleted_key > ?)
            ORDER BY created_key DESC
            LIMIT 1
            ",
        )
        .bind(table)
        .bind(&row_id)
        .bind(&key)
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(row.map(|r| entity_value_from_json(&r.data)))
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
            SELECT row_id, data, created_key FROM entity_rows
            WHERE table_name = ? AND created_key <= ?
              AND (deleted_key IS NULL OR deleted_key > ?)
            ORDER BY row_id, created_key DESC
            ",
        )
        .bind(table)
        .bind(&key)
        .bind(&key)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let row_id: String = row.try_get("row_id").map_err(InfraError::Database)?;
            if !seen.insert(row_id) {
                // Already kept the newest version for this row_id
                // (ORDER BY row_id, created_key DESC means the first hit
                // per row_id is the newest).
                continue;
            }
            let data: String = row.try_get("data").map_err(InfraError::Database)?;
            let value = entity_value_from_json(&data);
            if filter.iter().all(|(k, v)| value.get(k) == Some(v)) {
                out.push(value);
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, row))]
    async fn create(&self, table: &str, row: EntityValue, checkpoint: Checkpoint) -> Result<()> {
        let Some(id) = row.get("id") else {
            return Err(InfraError::NonRetryable(format!("entity row for {table} has no \"id\" field")).into());
        };
        let row_id = row_id_of(id);
        let key = checkpoint.sort_key();
        let data = serde_json::to_string(&Value::Object(row.into_iter().collect())).map_err(InfraError::Serialization)?;
        sqlx::query(
            r"
            INSERT INTO entity_rows (table_name, row_id, data, created_key, deleted_key)
            VALUES (?, ?, ?, ?, NULL)
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
        let row_id = row_id_of(id);
        let key = checkpoint.sort_key();
        sqlx::query(
            r"
            UPDATE entity_rows SET deleted_key = ?
            WHERE table_name = ? AND row_id = ? AND deleted_key IS NULL
            ",
        )
        .bind(&key)
        .bind(table)
        .bind(&row_id)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn revert(&self, checkpoint: Checkpoint) -> Result<()> {
        let key = checkpoint.sort_key();
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        sqlx::query("DELETE FROM entity_rows WHERE created_key > ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        sqlx::query("UPDATE entity_rows SET deleted_key = NULL WHERE deleted_key > ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::primitives::{BlockNumber, ChainId};
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    fn cp(n: u64) -> Checkpoint {
        Checkpoint::new(n, ChainId::new(1), BlockNumber::new(n), 0)
    }

    async fn store() -> SqliteEntityStore {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite pool");
        let store = SqliteEntityStore::new(pool);
        store.run_migrations().await.expect("schema bootstrap");
        store
    }

    fn row(id: &str) -> EntityValue {
        let mut m = EntityValue::new();
        m.insert("id".into(), json!(id));
        m.insert("value".into(), json!(1));
        m
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = store().await;
        store.create("accounts", row("a"), cp(1)).await.unwrap();
        let found = store.find_unique("accounts", &json!("a"), cp(5)).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn find_at_checkpoint_before_creation_is_none() {
        let store = store().await;
        store.create("accounts", row("a"), cp(10)).await.unwrap();
        let found = store.find_unique("accounts", &json!("a"), cp(5)).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn revert_undoes_creates_and_deletes_after_checkpoint() {
        let store = store().await;
        store.create("accounts", row("a"), cp(1)).await.unwrap();
        store.delete("accounts", &json!("a"), cp(5)).await.unwrap();
        store.create("accounts", row("b"), cp(8)).await.unwrap();

        store.revert(cp(3)).await.unwrap();

        assert!(
            store.find_unique("accounts", &json!("a"), cp(100)).await.unwrap().is_some(),
            "delete at checkpoint 5 should be undone by revert(3)"
        );
        assert!(
            store.find_unique("accounts", &json!("b"), cp(100)).await.unwrap().is_none(),
            "create at checkpoint 8 should be undone by revert(3)"
        );
    }
}
