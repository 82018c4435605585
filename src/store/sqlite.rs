//! SQLite implementation of [`SyncStore`] using SQLx.
//!
//! A lighter-weight backend for single-process/local deployments. The
//! schema mirrors `migrations/0001_init.sql` but without Postgres-only
//! types: `NUMERIC(78,0)` becomes a sign-prefixed, zero-padded `TEXT` column
//! via [`Uint256::to_sqlite_string`]/[`Uint256::from_sqlite_string`], and
//! `JSONB` becomes plain `TEXT` holding serialized JSON. Since those types
//! differ from the Postgres migration file, this backend bootstraps its own
//! schema with `CREATE TABLE IF NOT EXISTS` rather than sharing
//! `sqlx::migrate!`.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, Row};
use tracing::instrument;

use crate::core::{
    Checkpoint, ChildAddressLocation, FactoryFragment, Interval, LogFilter,
    interval_intersection_many, interval_union,
};
use crate::error::{InfraError, Result};
use crate::types::entities::{
    Block, DecodedEvent, FunctionMetadata, Log, RpcRequestKey, RpcRequestResult, Transaction,
};
use crate::types::primitives::{BlockNumber, ChainId, EthAddress, Uint256};

use super::sync_store::{EventSource, LogEventsPage, LogEventsQuery, SyncStore};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS blocks (
    chain_id INTEGER NOT NULL,
    hash BLOB NOT NULL,
    parent_hash BLOB NOT NULL,
    number INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    PRIMARY KEY (chain_id, hash)
);
CREATE INDEX IF NOT EXISTS idx_blocks_number ON blocks (chain_id, number);

CREATE TABLE IF NOT EXISTS transactions (
    chain_id INTEGER NOT NULL,
    hash BLOB NOT NULL,
    block_number INTEGER NOT NULL,
    block_hash BLOB NOT NULL,
    transaction_index INTEGER NOT NULL,
    from_address BLOB NOT NULL,
    to_address BLOB,
    value TEXT NOT NULL,
    PRIMARY KEY (chain_id, hash)
);
CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions (chain_id, block_number);

CREATE TABLE IF NOT EXISTS logs (
    chain_id INTEGER NOT NULL,
    block_hash BLOB NOT NULL,
    block_number INTEGER NOT NULL,
    log_index INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL,
    address BLOB NOT NULL,
    topic0 BLOB,
    topic1 BLOB,
    topic2 BLOB,
    topic3 BLOB,
    data BLOB NOT NULL,
    PRIMARY KEY (chain_id, block_hash, log_index)
);
CREATE INDEX IF NOT EXISTS idx_logs_topic0 ON logs (topic0);
CREATE INDEX IF NOT EXISTS idx_logs_address ON logs (chain_id, address, block_number);

CREATE TABLE IF NOT EXISTS log_filter_intervals (
    chain_id INTEGER NOT NULL,
    fragment_id TEXT NOT NULL,
    start_block INTEGER NOT NULL,
    end_block INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_log_filter_intervals ON log_filter_intervals (chain_id, fragment_id);

CREATE TABLE IF NOT EXISTS factory_log_filter_intervals (
    chain_id INTEGER NOT NULL,
    fragment_id TEXT NOT NULL,
    start_block INTEGER NOT NULL,
    end_block INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_factory_log_filter_intervals ON factory_log_filter_intervals (chain_id, fragment_id);

CREATE TABLE IF NOT EXISTS rpc_request_results (
    chain_id INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    request TEXT NOT NULL,
    result TEXT NOT NULL,
    PRIMARY KEY (chain_id, block_number, request)
);

CREATE TABLE IF NOT EXISTS function_metadata (
    function_id TEXT PRIMARY KEY,
    function_name TEXT NOT NULL,
    to_timestamp INTEGER NOT NULL,
    to_chain_id INTEGER NOT NULL,
    to_block INTEGER NOT NULL,
    to_log_index INTEGER,
    event_count INTEGER NOT NULL
);
";

/// SQLite-backed [`SyncStore`].
#[derive(Debug, Clone)]
pub struct SqliteSyncStore {
    pool: SqlitePool,
}

impl SqliteSyncStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Reference to the underlying pool, e.g. for the healthcheck endpoint.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create every table this backend needs if it doesn't already exist.
    ///
    /// # Errors
    /// Returns an error if any statement fails to execute.
    pub async fn run_migrations(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await.map_err(InfraError::Database)?;
        }
        Ok(())
    }

    async fn upsert_block(tx: &mut sqlx::SqliteConnection, block: &Block) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO blocks (chain_id, hash, parent_hash, number, timestamp)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (chain_id, hash) DO NOTHING
            ",
        )
        .bind(i64::from(block.chain_id))
        .bind(block.hash.as_slice())
        .bind(block.parent_hash.as_slice())
        .bind(i64::from(block.number))
        .bind(block.timestamp as i64)
        .execute(tx)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    async fn upsert_transaction(tx: &mut sqlx::SqliteConnection, t: &Transaction) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO transactions
                (chain_id, hash, block_number, block_hash, transaction_index, from_address, to_address, value)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (chain_id, hash) DO NOTHING
            ",
        )
        .bind(i64::from(t.chain_id))
        .bind(t.hash.as_slice())
        .bind(i64::from(t.block_number))
        .bind(t.block_hash.as_slice())
        .bind(t.transaction_index as i32)
        .bind(t.from.as_slice())
        .bind(t.to.map(|a| a.as_slice().to_vec()))
        .bind(t.value.to_sqlite_string())
        .execute(tx)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    async fn upsert_log(tx: &mut sqlx::SqliteConnection, log: &Log) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO logs
                (chain_id, block_hash, block_number, log_index, transaction_hash, address,
                 topic0, topic1, topic2, topic3, data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (chain_id, block_hash, log_index) DO NOTHING
            ",
        )
        .bind(i64::from(log.chain_id))
        .bind(log.block_hash.as_slice())
        .bind(i64::from(log.block_number))
        .bind(log.log_index as i32)
        .bind(log.transaction_hash.as_slice())
        .bind(log.address.as_slice())
        .bind(log.topics[0].map(|t| t.as_slice().to_vec()))
        .bind(log.topics[1].map(|t| t.as_slice().to_vec()))
        .bind(log.topics[2].map(|t| t.as_slice().to_vec()))
        .bind(log.topics[3].map(|t| t.as_slice().to_vec()))
        .bind(log.data.clone())
        .execute(tx)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    async fn append_interval_rows(
        tx: &mut sqlx::SqliteConnection,
        table: &str,
        chain_id: ChainId,
        fragment_id: &str,
        interval: Interval,
    ) -> Result<()> {
        let query =
            format!("INSERT INTO {table} (chain_id, fragment_id, start_block, end_block) VALUES (?, ?, ?, ?)");
        sqlx::query(&query)
            .bind(i64::from(chain_id))
            .bind(fragment_id)
            .bind(interval.start_block as i64)
            .bind(interval.end_block as i64)
            .execute(tx)
            .await
            .map_err(InfraError::Database)?;
        Ok(())
    }

    /// Compact `table`'s rows for `(chain_id, fragment_id)`: read, union, delete, re-insert.
    async fn compact_intervals(
        &self,
        table: &str,
        chain_id: ChainId,
        fragment_id: &str,
    ) -> Result<Vec<Interval>> {
        let select =
            format!("SELECT start_block, end_block FROM {table} WHERE chain_id = ? AND fragment_id = ?");
        let rows = sqlx::query(&select)
            .bind(i64::from(chain_id))
            .bind(fragment_id)
            .fetch_all(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        let existing: Vec<Interval> = rows
            .into_iter()
            .map(|r| Interval::new(r.get::<i64, _>("start_block") as u64, r.get::<i64, _>("end_block") as u64))
            .collect();
        let unioned = interval_union(&existing);

        if unioned.len() != existing.len() || unioned != existing {
            let delete = format!("DELETE FROM {table} WHERE chain_id = ? AND fragment_id = ?");
            sqlx::query(&delete)
                .bind(i64::from(chain_id))
                .bind(fragment_id)
                .execute(&self.pool)
                .await
                .map_err(InfraError::Database)?;
            for interval in &unioned {
                let insert = format!(
                    "INSERT INTO {table} (chain_id, fragment_id, start_block, end_block) VALUES (?, ?, ?, ?)"
                );
                sqlx::query(&insert)
                    .bind(i64::from(chain_id))
                    .bind(fragment_id)
                    .bind(interval.start_block as i64)
                    .bind(interval.end_block as i64)
                    .execute(&self.pool)
                    .await
                    .map_err(InfraError::Database)?;
            }
        }
        Ok(unioned)
    }
}

#[derive(FromRow)]
struct BlockRow {
    chain_id: i64,
    hash: Vec<u8>,
    parent_hash: Vec<u8>,
    number: i64,
    timestamp: i64,
}

impl TryFrom<BlockRow> for Block {
    type Error = InfraError;

    fn try_from(row: BlockRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            chain_id: ChainId::new(row.chain_id as u64),
            hash: B256::from_slice(&row.hash),
            parent_hash: B256::from_slice(&row.parent_hash),
            number: BlockNumber::new(row.number as u64),
            timestamp: row.timestamp as u64,
        })
    }
}

#[derive(FromRow)]
struct TransactionRow {
    chain_id: i64,
    hash: Vec<u8>,
    block_number: i64,
    block_hash: Vec<u8>,
    transaction_index: i32,
    from_address: Vec<u8>,
    to_address: Option<Vec<u8>>,
    value: String,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = InfraError;

    fn try_from(row: TransactionRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            chain_id: ChainId::new(row.chain_id as u64),
            hash: B256::from_slice(&row.hash),
            block_number: BlockNumber::new(row.block_number as u64),
            block_hash: B256::from_slice(&row.block_hash),
            transaction_index: row.transaction_index as u32,
            from: Address::from_slice(&row.from_address),
            to: row.to_address.as_deref().map(Address::from_slice),
            value: Uint256::from_sqlite_string(&row.value)
                .map_err(|_| InfraError::EventDecoding("invalid uint256 in transactions.value".into()))?,
        })
    }
}

#[derive(FromRow)]
struct LogRow {
    chain_id: i64,
    block_hash: Vec<u8>,
    block_number: i64,
    log_index: i32,
    transaction_hash: Vec<u8>,
    address: Vec<u8>,
    topic0: Option<Vec<u8>>,
    topic1: Option<Vec<u8>>,
    topic2: Option<Vec<u8>>,
    topic3: Option<Vec<u8>>,
    data: Vec<u8>,
}

impl From<LogRow> for Log {
    fn from(row: LogRow) -> Self {
        Self {
            chain_id: ChainId::new(row.chain_id as u64),
            block_hash: B256::from_slice(&row.block_hash),
            block_number: BlockNumber::new(row.block_number as u64),
            log_index: row.log_index as u32,
            transaction_hash: B256::from_slice(&row.transaction_hash),
            address: Address::from_slice(&row.address),
            topics: [
                row.topic0.as_deref().map(B256::from_slice),
                row.topic1.as_deref().map(B256::from_slice),
                row.topic2.as_deref().map(B256::from_slice),
                row.topic3.as_deref().map(B256::from_slice),
            ],
            data: row.data,
        }
    }
}

#[derive(FromRow)]
struct FunctionMetadataRow {
    function_id: String,
    function_name: String,
    to_timestamp: i64,
    to_chain_id: i64,
    to_block: i64,
    to_log_index: Option<i32>,
    event_count: i64,
}

impl From<FunctionMetadataRow> for FunctionMetadata {
    fn from(row: FunctionMetadataRow) -> Self {
        let chain_id = ChainId::new(row.to_chain_id as u64);
        let block_number = BlockNumber::new(row.to_block as u64);
        let to_checkpoint = row.to_log_index.map_or_else(
            || Checkpoint::end_of_block(row.to_timestamp as u64, chain_id, block_number),
            |log_index| Checkpoint::new(row.to_timestamp as u64, chain_id, block_number, log_index as u32),
        );
        Self {
            function_id: row.function_id,
            function_name: row.function_name,
            from_checkpoint: to_checkpoint,
            to_checkpoint,
            event_count: row.event_count as u64,
        }
    }
}

#[async_trait]
impl SyncStore for SqliteSyncStore {
    #[instrument(skip(self, block, transactions, logs))]
    async fn insert_log_filter_interval(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
        interval: Interval,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        Self::upsert_block(&mut tx, &block).await?;
        for t in &transactions {
            Self::upsert_transaction(&mut tx, t).await?;
        }
        for l in &logs {
            Self::upsert_log(&mut tx, l).await?;
        }
        for fragment in log_filter.fragments() {
            Self::append_interval_rows(
                &mut tx,
                "log_filter_intervals",
                chain_id,
                &fragment.fingerprint(),
                interval,
            )
            .await?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    async fn get_log_filter_intervals(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
    ) -> Result<Vec<Interval>> {
        let mut per_fragment = Vec::new();
        for fragment in log_filter.fragments() {
            per_fragment.push(
                self.compact_intervals("log_filter_intervals", chain_id, &fragment.fingerprint())
                    .await?,
            );
        }
        Ok(interval_intersection_many(&per_fragment))
    }

    async fn insert_factory_log_filter_interval(
        &self,
        chain_id: ChainId,
        factory: &FactoryFragment,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
        interval: Interval,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        Self::upsert_block(&mut tx, &block).await?;
        for t in &transactions {
            Self::upsert_transaction(&mut tx, t).await?;
        }
        for l in &logs {
            Self::upsert_log(&mut tx, l).await?;
        }
        Self::append_interval_rows(
            &mut tx,
            "factory_log_filter_intervals",
            chain_id,
            &factory.fingerprint(),
            interval,
        )
        .await?;
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    async fn get_factory_log_filter_intervals(
        &self,
        chain_id: ChainId,
        factory: &FactoryFragment,
    ) -> Result<Vec<Interval>> {
        self.compact_intervals("factory_log_filter_intervals", chain_id, &factory.fingerprint())
            .await
    }

    async fn insert_factory_child_address_logs(&self, _chain_id: ChainId, logs: Vec<Log>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for log in &logs {
            Self::upsert_log(&mut tx, log).await?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    async fn get_factory_child_addresses(
        &self,
        chain_id: ChainId,
        factory: &FactoryFragment,
        up_to_block_number: BlockNumber,
        after_block_number: BlockNumber,
        page_size: u32,
    ) -> Result<Vec<(BlockNumber, EthAddress)>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r"
            SELECT chain_id, block_hash, block_number, log_index, transaction_hash, address,
                   topic0, topic1, topic2, topic3, data
            FROM logs
            WHERE chain_id = ? AND address = ? AND topic0 = ?
              AND block_number > ? AND block_number <= ?
            ORDER BY block_number ASC
            LIMIT ?
            ",
        )
        .bind(i64::from(chain_id))
        .bind(factory.factory_address.as_slice())
        .bind(factory.event_selector.as_slice())
        .bind(i64::from(after_block_number))
        .bind(i64::from(up_to_block_number))
        .bind(i64::from(page_size))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let log: Log = row.into();
            let topics: Vec<B256> = log.topics.iter().filter_map(|t| *t).collect();
            if let Ok(addr) = factory.extract_child_address(&topics, &log.data) {
                out.push((log.block_number, EthAddress::from(addr)));
            }
        }
        Ok(out)
    }

    async fn insert_realtime_block(
        &self,
        _chain_id: ChainId,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        Self::upsert_block(&mut tx, &block).await?;
        for t in &transactions {
            Self::upsert_transaction(&mut tx, t).await?;
        }
        for l in &logs {
            Self::upsert_log(&mut tx, l).await?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    async fn insert_realtime_interval(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
        interval: Interval,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for fragment in log_filter.fragments() {
            Self::append_interval_rows(
                &mut tx,
                "log_filter_intervals",
                chain_id,
                &fragment.fingerprint(),
                interval,
            )
            .await?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    async fn delete_realtime_data(&self, chain_id: ChainId, from_block: BlockNumber) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        let from = i64::from(from_block);

        sqlx::query("DELETE FROM blocks WHERE chain_id = ? AND number > ?")
            .bind(i64::from(chain_id))
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        sqlx::query("DELETE FROM transactions WHERE chain_id = ? AND block_number > ?")
            .bind(i64::from(chain_id))
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        sqlx::query("DELETE FROM logs WHERE chain_id = ? AND block_number > ?")
            .bind(i64::from(chain_id))
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        sqlx::query("DELETE FROM rpc_request_results WHERE chain_id = ? AND block_number > ?")
            .bind(i64::from(chain_id))
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;

        for table in ["log_filter_intervals", "factory_log_filter_intervals"] {
            let delete = format!("DELETE FROM {table} WHERE chain_id = ? AND start_block > ?");
            sqlx::query(&delete)
                .bind(i64::from(chain_id))
                .bind(from)
                .execute(&mut *tx)
                .await
                .map_err(InfraError::Database)?;
            let clamp = format!("UPDATE {table} SET end_block = ? WHERE chain_id = ? AND end_block > ?");
            sqlx::query(&clamp)
                .bind(from)
                .bind(i64::from(chain_id))
                .bind(from)
                .execute(&mut *tx)
                .await
                .map_err(InfraError::Database)?;
        }

        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    async fn insert_rpc_request_result(&self, result: RpcRequestResult) -> Result<()> {
        let result_text = serde_json::to_string(&result.result).map_err(InfraError::Serialization)?;
        sqlx::query(
            r"
            INSERT INTO rpc_request_results (chain_id, block_number, request, result)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (chain_id, block_number, request) DO UPDATE SET result = excluded.result
            ",
        )
        .bind(i64::from(result.key.chain_id))
        .bind(i64::from(result.key.block_number))
        .bind(&result.key.request)
        .bind(result_text)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    async fn get_rpc_request_result(&self, key: &RpcRequestKey) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT result FROM rpc_request_results WHERE chain_id = ? AND block_number = ? AND request = ?")
            .bind(i64::from(key.chain_id))
            .bind(i64::from(key.block_number))
            .bind(&key.request)
            .fetch_optional(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        row.map(|r| {
            let text: String = r.get("result");
            serde_json::from_str(&text).map_err(InfraError::Serialization)
        })
        .transpose()
        .map_err(Into::into)
    }

    async fn get_log_events(&self, query: LogEventsQuery) -> Result<LogEventsPage> {
        // Coarse `topic0` pre-filter (SQLite has no `= ANY($1)`, so this is
        // issued per-selector and the rows merged); the exact fragment
        // predicate is refined in process, same as the in-memory store and
        // the Postgres backend.
        let selectors: Vec<Vec<u8>> = match &query.source {
            EventSource::LogFilters(filters) => {
                filters.iter().map(|(_, sel)| sel.as_slice().to_vec()).collect()
            }
            EventSource::Factories(factories) => {
                factories.iter().map(|(_, sel)| sel.as_slice().to_vec()).collect()
            }
        };

        let mut rows = Vec::new();
        for selector in &selectors {
            let page = sqlx::query_as::<_, LogRow>(
                r"
                SELECT chain_id, block_hash, block_number, log_index, transaction_hash, address,
                       topic0, topic1, topic2, topic3, data
                FROM logs
                WHERE topic0 = ?
                ORDER BY block_number ASC, log_index ASC
                ",
            )
            .bind(selector)
            .fetch_all(&self.pool)
            .await
            .map_err(InfraError::Database)?;
            rows.extend(page);
        }

        let mut matched = Vec::new();
        for row in rows {
            let log: Log = row.into();
            if !log_matches_source(&log, &query.source, self).await? {
                continue;
            }
            let block_row = sqlx::query_as::<_, BlockRow>(
                "SELECT chain_id, hash, parent_hash, number, timestamp FROM blocks WHERE chain_id = ? AND hash = ?",
            )
            .bind(i64::from(log.chain_id))
            .bind(log.block_hash.as_slice())
            .fetch_optional(&self.pool)
            .await
            .map_err(InfraError::Database)?;
            let Some(block_row) = block_row else { continue };
            let block: Block = block_row.try_into()?;

            let tx_row = sqlx::query_as::<_, TransactionRow>(
                "SELECT chain_id, hash, block_number, block_hash, transaction_index, from_address, to_address, value FROM transactions WHERE chain_id = ? AND hash = ?",
            )
            .bind(i64::from(log.chain_id))
            .bind(log.transaction_hash.as_slice())
            .fetch_optional(&self.pool)
            .await
            .map_err(InfraError::Database)?;
            let Some(tx_row) = tx_row else { continue };
            let transaction: Transaction = tx_row.try_into()?;

            let checkpoint = log.checkpoint(block.timestamp);
            if checkpoint <= query.from_checkpoint || checkpoint > query.to_checkpoint {
                continue;
            }
            matched.push(DecodedEvent {
                checkpoint,
                contract_name: query.contract_name.clone(),
                event_name: query.event_name.clone(),
                args: serde_json::Map::new(),
                log,
                block,
                transaction,
            });
        }
        matched.sort_by_key(|e| e.checkpoint);

        let last_checkpoint = matched.last().map(|e| e.checkpoint);
        let limit = query.limit as usize;
        let has_next_page = matched.len() > limit;
        matched.truncate(limit);
        let last_checkpoint_in_page = matched.last().map(|e| e.checkpoint);

        Ok(LogEventsPage {
            events: matched,
            has_next_page,
            last_checkpoint_in_page,
            last_checkpoint,
        })
    }

    async fn flush_function_metadata(&self, rows: Vec<FunctionMetadata>) -> Result<()> {
        for row in rows {
            let (chain_id, block, log_index) = (
                i64::from(row.to_checkpoint.chain_id),
                i64::from(row.to_checkpoint.block_number),
                row.to_checkpoint.log_index.map(|i| i as i32),
            );
            sqlx::query(
                r"
                INSERT INTO function_metadata
                    (function_id, function_name, to_timestamp, to_chain_id, to_block, to_log_index, event_count)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (function_id) DO UPDATE SET
                    function_name = excluded.function_name,
                    to_timestamp = excluded.to_timestamp,
                    to_chain_id = excluded.to_chain_id,
                    to_block = excluded.to_block,
                    to_log_index = excluded.to_log_index,
                    event_count = excluded.event_count
                ",
            )
            .bind(&row.function_id)
            .bind(&row.function_name)
            .bind(row.to_checkpoint.block_timestamp as i64)
            .bind(chain_id)
            .bind(block)
            .bind(log_index)
            .bind(row.event_count as i64)
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        }
        Ok(())
    }

    async fn load_function_metadata(&self) -> Result<Vec<FunctionMetadata>> {
        let rows = sqlx::query_as::<_, FunctionMetadataRow>(
            "SELECT function_id, function_name, to_timestamp, to_chain_id, to_block, to_log_index, event_count FROM function_metadata",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

async fn log_matches_source(log: &Log, source: &EventSource, store: &SqliteSyncStore) -> Result<bool> {
    match source {
        EventSource::LogFilters(filters) => Ok(filters.iter().any(|(filter, selector)| {
            log.topics[0] == Some(*selector)
                && filter.fragments().iter().any(|f| f.matches(log.address, &log.topics))
        })),
        EventSource::Factories(factories) => {
            for (factory, selector) in factories {
                if log.topics[0] != Some(*selector) {
                    continue;
                }
                let children = store
                    .get_factory_child_addresses(
                        log.chain_id,
                        factory,
                        log.block_number,
                        BlockNumber::new(0),
                        u32::MAX,
                    )
                    .await?;
                if children.iter().any(|(_, addr)| Address::from(*addr) == log.address) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_statements_are_nonempty() {
        let statements: Vec<&str> = SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
        assert!(statements.len() >= 8);
        assert!(statements.iter().all(|s| s.starts_with("CREATE")));
    }

    #[test]
    fn parses_topic_location() {
        assert_eq!(
            crate::core::parse_child_address_location("topic1").unwrap(),
            ChildAddressLocation::Topic(1)
        );
    }
}
