//! The `EntityStore` port: checkpointed CRUD over user-declared entity
//! tables, plus the `revert(checkpoint)` operation the scheduler relies on
//! for reorg rewinds and per-task retry rollback.
//!
//! `spec.md` §3: "entity store versions at `c` are consistent with
//! processed tasks whose checkpoint <= `c`"; §6: "`revert({checkpoint})`,
//! which restores the store to the state it had when all tasks with
//! checkpoint <= `checkpoint` were processed."

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::Checkpoint;
use crate::error::Result;

/// A single entity row: an opaque JSON object keyed by the user's declared
/// schema. The engine never inspects field contents, only the primary key
/// and checkpoint bookkeeping columns.
pub type EntityValue = BTreeMap<String, Value>;

/// Checkpointed CRUD surface exposed to user indexing functions through the
/// `db` field of their context (`spec.md` §6).
///
/// All mutating methods are bound to the checkpoint of the task invoking
/// them; the default SQL adapter stamps rows with `_checkpoint_created` /
/// `_checkpoint_deleted` so `revert` can undo exactly the writes made at or
/// after a given checkpoint (§A.5).
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Find a single row by primary key, as of `checkpoint`.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn find_unique(
        &self,
        table: &str,
        id: &Value,
        checkpoint: Checkpoint,
    ) -> Result<Option<EntityValue>>;

    /// Find rows matching `filter` (an opaque equality filter over column
    /// names), as of `checkpoint`.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn find_many(
        &self,
        table: &str,
        filter: &EntityValue,
        checkpoint: Checkpoint,
    ) -> Result<Vec<EntityValue>>;

    /// Create a new row, recording it as written at `checkpoint`.
    ///
    /// # Errors
    /// Returns an error if a row with the same primary key already exists or
    /// the storage operation fails.
    async fn create(&self, table: &str, row: EntityValue, checkpoint: Checkpoint) -> Result<()>;

    /// Update an existing row by primary key, recording the new version as
    /// written at `checkpoint`.
    ///
    /// # Errors
    /// Returns an error if the row doesn't exist or the storage operation
    /// fails.
    async fn update(
        &self,
        table: &str,
        id: &Value,
        patch: EntityValue,
        checkpoint: Checkpoint,
    ) -> Result<()>;

    /// Create or update a row by primary key.
    ///
    /// # Errors
    /// Returns an error if the storage operation fails.
    async fn upsert(&self, table: &str, row: EntityValue, checkpoint: Checkpoint) -> Result<()>;

    /// Delete a row by primary key, recording the deletion at `checkpoint`
    /// so `revert` can undo it.
    ///
    /// # Errors
    /// Returns an error if the storage operation fails.
    async fn delete(&self, table: &str, id: &Value, checkpoint: Checkpoint) -> Result<()>;

    /// Bulk-create several rows in one operation.
    ///
    /// # Errors
    /// Returns an error if any row conflicts or the storage operation fails.
    async fn create_many(
        &self,
        table: &str,
        rows: Vec<EntityValue>,
        checkpoint: Checkpoint,
    ) -> Result<()> {
        for row in rows {
            self.create(table, row, checkpoint).await?;
        }
        Ok(())
    }

    /// Restore the store to the state it had when all tasks with checkpoint
    /// `<= checkpoint` were processed: deletes rows created after
    /// `checkpoint` and un-deletes rows deleted after `checkpoint`.
    ///
    /// # Errors
    /// Returns an error if the storage operation fails.
    async fn revert(&self, checkpoint: Checkpoint) -> Result<()>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use fake::InMemoryEntityStore;

#[cfg(any(test, feature = "test-utils"))]
mod fake {
    use std::sync::Mutex;

    use super::{BTreeMap, Checkpoint, EntityStore, EntityValue, Result, Value, async_trait};

    #[derive(Debug, Clone)]
    struct VersionedRow {
        value: EntityValue,
        created_at: Checkpoint,
        deleted_at: Option<Checkpoint>,
    }

    /// In-memory `EntityStore` for scheduler/handler tests.
    ///
    /// Keeps every version of every row so `revert` is exact rather than
    /// best-effort, matching the append-only versioning `DESIGN.md` grounds
    /// on the teacher's reorg-rollback shape.
    #[derive(Debug, Default)]
    pub struct InMemoryEntityStore {
        tables: Mutex<BTreeMap<String, Vec<VersionedRow>>>,
    }

    impl InMemoryEntityStore {
        /// Construct an empty store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn id_of(row: &EntityValue) -> Option<Value> {
            row.get("id").cloned()
        }
    }

    #[async_trait]
    impl EntityStore for InMemoryEntityStore {
        async fn find_unique(
            &self,
            table: &str,
            id: &Value,
            checkpoint: Checkpoint,
        ) -> Result<Option<EntityValue>> {
            let tables = self.tables.lock().expect("entity store mutex poisoned");
            let Some(rows) = tables.get(table) else {
                return Ok(None);
            };
            let found = rows
                .iter()
                .filter(|r| {
                    Self::id_of(&r.value).as_ref() == Some(id)
                        && r.created_at <= checkpoint
                        && r.deleted_at.is_none_or(|d| d > checkpoint)
                })
                .max_by_key(|r| r.created_at)
                .map(|r| r.value.clone());
            Ok(found)
        }

        async fn find_many(
            &self,
            table: &str,
            filter: &EntityValue,
            checkpoint: Checkpoint,
        ) -> Result<Vec<EntityValue>> {
            let tables = self.tables.lock().expect("entity store mutex poisoned");
            let Some(rows) = tables.get(table) else {
                return Ok(Vec::new());
            };
            Ok(rows
                .iter()
                .filter(|r| {
                    r.created_at <= checkpoint
                        && r.deleted_at.is_none_or(|d| d > checkpoint)
                        && filter.iter().all(|(k, v)| r.value.get(k) == Some(v))
                })
                .map(|r| r.value.clone())
                .collect())
        }

        async fn create(
            &self,
            table: &str,
            row: EntityValue,
            checkpoint: Checkpoint,
        ) -> Result<()> {
            let mut tables = self.tables.lock().expect("entity store mutex poisoned");
            tables.entry(table.to_string()).or_default().push(VersionedRow {
                value: row,
                created_at: checkpoint,
                deleted_at: None,
            });
            Ok(())
        }

        async fn update(
            &self,
            table: &str,
            id: &Value,
            patch: EntityValue,
            checkpoint: Checkpoint,
        ) -> Result<()> {
            let existing = self.find_unique(table, id, checkpoint).await?;
            let mut merged = existing.unwrap_or_default();
            merged.extend(patch);
            self.create(table, merged, checkpoint).await
        }

        async fn upsert(
            &self,
            table: &str,
            row: EntityValue,
            checkpoint: Checkpoint,
        ) -> Result<()> {
            self.create(table, row, checkpoint).await
        }

        async fn delete(&self, table: &str, id: &Value, checkpoint: Checkpoint) -> Result<()> {
            let mut tables = self.tables.lock().expect("entity store mutex poisoned");
            if let Some(rows) = tables.get_mut(table) {
                for row in rows.iter_mut() {
                    if Self::id_of(&row.value).as_ref() == Some(id) && row.deleted_at.is_none() {
                        row.deleted_at = Some(checkpoint);
                    }
                }
            }
            Ok(())
        }

        async fn revert(&self, checkpoint: Checkpoint) -> Result<()> {
            let mut tables = self.tables.lock().expect("entity store mutex poisoned");
            for rows in tables.values_mut() {
                rows.retain(|r| r.created_at <= checkpoint);
                for row in rows.iter_mut() {
                    if row.deleted_at.is_some_and(|d| d > checkpoint) {
                        row.deleted_at = None;
                    }
                }
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::types::primitives::{BlockNumber, ChainId};
        use serde_json::json;

        fn cp(n: u64) -> Checkpoint {
            Checkpoint::new(n, ChainId::new(1), BlockNumber::new(n), 0)
        }

        fn row(id: &str) -> EntityValue {
            let mut m = EntityValue::new();
            m.insert("id".into(), json!(id));
            m.insert("value".into(), json!(1));
            m
        }

        #[tokio::test]
        async fn create_then_find() {
            let store = InMemoryEntityStore::new();
            store.create("accounts", row("a"), cp(1)).await.unwrap();
            let found = store
                .find_unique("accounts", &json!("a"), cp(5))
                .await
                .unwrap();
            assert!(found.is_some());
        }

        #[tokio::test]
        async fn find_at_checkpoint_before_creation_is_none() {
            let store = InMemoryEntityStore::new();
            store.create("accounts", row("a"), cp(10)).await.unwrap();
            let found = store
                .find_unique("accounts", &json!("a"), cp(5))
                .await
                .unwrap();
            assert!(found.is_none());
        }

        #[tokio::test]
        async fn delete_then_find_after_is_none() {
            let store = InMemoryEntityStore::new();
            store.create("accounts", row("a"), cp(1)).await.unwrap();
            store.delete("accounts", &json!("a"), cp(5)).await.unwrap();
            assert!(
                store
                    .find_unique("accounts", &json!("a"), cp(10))
                    .await
                    .unwrap()
                    .is_none()
            );
            assert!(
                store
                    .find_unique("accounts", &json!("a"), cp(3))
                    .await
                    .unwrap()
                    .is_some()
            );
        }

        #[tokio::test]
        async fn revert_undoes_creates_and_deletes_after_checkpoint() {
            let store = InMemoryEntityStore::new();
            store.create("accounts", row("a"), cp(1)).await.unwrap();
            store.delete("accounts", &json!("a"), cp(5)).await.unwrap();
            store.create("accounts", row("b"), cp(8)).await.unwrap();

            store.revert(cp(3)).await.unwrap();

            assert!(
                store
                    .find_unique("accounts", &json!("a"), cp(100))
                    .await
                    .unwrap()
                    .is_some(),
                "delete at checkpoint 5 should be undone by revert(3)"
            );
            assert!(
                store
                    .find_unique("accounts", &json!("b"), cp(100))
                    .await
                    .unwrap()
                    .is_none(),
                "create at checkpoint 8 should be undone by revert(3)"
            );
        }
    }
}
