//! Durable storage: the [`SyncStore`](sync_store::SyncStore) port, its
//! Postgres- and SQLite-backed implementations, an in-memory fake for tests,
//! and the retry envelope every operation is wrapped in.

pub mod entity_postgres;
pub mod entity_sqlite;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod retrying;
pub mod sqlite;
pub mod sync_store;

pub use entity_postgres::PostgresEntityStore;
pub use entity_sqlite::SqliteEntityStore;
pub use memory::InMemorySyncStore;
pub use postgres::PostgresSyncStore;
pub use retry::with_retry;
pub use retrying::RetryingSyncStore;
pub use sqlite::SqliteSyncStore;
pub use sync_store::{EventSource, LogEventsPage, LogEventsQuery, SyncStore};
