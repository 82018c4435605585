//! The `SyncStore` port: durable, idempotent storage of EVM chain data plus
//! interval bookkeeping and ordered event-page delivery (`spec.md` §4.1).
//!
//! Every operation here is wrapped by callers in
//! [`crate::store::retry::with_retry`]; the trait itself is transport- and
//! backend-agnostic so both [`crate::store::postgres::PostgresSyncStore`]
//! and the in-memory fake in [`crate::store::memory`] satisfy it.

use async_trait::async_trait;

use crate::core::{Checkpoint, FactoryFragment, Interval, LogFilter, LogFilterFragment};
use crate::error::Result;
use crate::types::entities::{
    Block, DecodedEvent, FunctionMetadata, Log, RpcRequestKey, RpcRequestResult, Transaction,
};
use crate::types::primitives::{BlockNumber, ChainId, EthAddress};

/// Selects which declared filters a `getLogEvents` query should match
/// against: either plain log filters or factory-derived filters, never a
/// mix within a single call (the scheduler issues one load per function
/// key, and a function's `sources` are homogeneous).
#[derive(Debug, Clone)]
pub enum EventSource {
    /// Plain log filters, matched by fragment predicate + `eventSelector`.
    LogFilters(Vec<(LogFilter, alloy::primitives::B256)>),
    /// Factory-derived filters: logs whose address is a child address
    /// produced by the given factory.
    Factories(Vec<(FactoryFragment, alloy::primitives::B256)>),
}

/// Parameters for `getLogEvents`.
#[derive(Debug, Clone)]
pub struct LogEventsQuery {
    /// Exclusive lower bound.
    pub from_checkpoint: Checkpoint,
    /// Inclusive upper bound.
    pub to_checkpoint: Checkpoint,
    /// Maximum rows to return (the store internally requests `limit + 1`).
    pub limit: u32,
    /// Which filters must match.
    pub source: EventSource,
    /// Declaring contract name, stamped onto every returned `DecodedEvent`.
    /// The scheduler issues one query per function key, so this is constant
    /// across the call.
    pub contract_name: String,
    /// Declaring event name, stamped onto every returned `DecodedEvent`.
    pub event_name: String,
}

/// Result of a `getLogEvents` call.
#[derive(Debug, Clone)]
pub struct LogEventsPage {
    /// Up to `limit` decoded events, strictly increasing in checkpoint.
    pub events: Vec<DecodedEvent>,
    /// Whether more events exist beyond this page within `(from, to]`.
    pub has_next_page: bool,
    /// Checkpoint of the last event actually returned in this page, if any.
    pub last_checkpoint_in_page: Option<Checkpoint>,
    /// Checkpoint of the newest matching event anywhere in `(from, to]`,
    /// used for caching metrics even when this page doesn't reach it.
    pub last_checkpoint: Option<Checkpoint>,
}

/// Durable, idempotent storage of blocks/transactions/logs plus interval
/// bookkeeping and ordered decoded-event delivery.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Upsert `block`/`transactions`/`logs` (ignore-on-conflict) and append
    /// `interval` to every fragment of `log_filter`, all in one transaction.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn insert_log_filter_interval(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
        interval: Interval,
    ) -> Result<()>;

    /// Compact each fragment's interval rows (delete, union, re-insert),
    /// then intersect the fragments' unions to get `log_filter`'s synced
    /// ranges.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn get_log_filter_intervals(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
    ) -> Result<Vec<Interval>>;

    /// Factory-fragment analogue of `insert_log_filter_interval`.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn insert_factory_log_filter_interval(
        &self,
        chain_id: ChainId,
        factory: &FactoryFragment,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
        interval: Interval,
    ) -> Result<()>;

    /// Factory-fragment analogue of `get_log_filter_intervals`.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn get_factory_log_filter_intervals(
        &self,
        chain_id: ChainId,
        factory: &FactoryFragment,
    ) -> Result<Vec<Interval>>;

    /// Bulk idempotent insert of logs known to be factory child-address
    /// announcements.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn insert_factory_child_address_logs(
        &self,
        chain_id: ChainId,
        logs: Vec<Log>,
    ) -> Result<()>;

    /// Paginated, ascending-`blockNumber` stream of child addresses
    /// produced by `factory` at or below `up_to_block_number`. Each call
    /// returns one page of up to `page_size` addresses; an empty or
    /// short page signals the end of the sequence.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn get_factory_child_addresses(
        &self,
        chain_id: ChainId,
        factory: &FactoryFragment,
        up_to_block_number: BlockNumber,
        after_block_number: BlockNumber,
        page_size: u32,
    ) -> Result<Vec<(BlockNumber, EthAddress)>>;

    /// Idempotent upsert of realtime block/transactions/logs. Does not
    /// touch interval tables; intervals are written at finality via
    /// `insert_realtime_interval`.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn insert_realtime_block(
        &self,
        chain_id: ChainId,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
    ) -> Result<()>;

    /// Record a now-final interval for `log_filter`'s fragments, without
    /// re-inserting block/tx/log rows (already written by
    /// `insert_realtime_block`).
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn insert_realtime_interval(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
        interval: Interval,
    ) -> Result<()>;

    /// Delete blocks/transactions/logs/rpc-cache rows with `number >
    /// from_block` for `chain_id`; delete interval rows with `startBlock >
    /// from_block` and clamp rows whose `endBlock > from_block` to
    /// `from_block`.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn delete_realtime_data(&self, chain_id: ChainId, from_block: BlockNumber) -> Result<()>;

    /// Upsert a cached RPC result.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn insert_rpc_request_result(&self, result: RpcRequestResult) -> Result<()>;

    /// Point-lookup a cached RPC result.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn get_rpc_request_result(&self, key: &RpcRequestKey) -> Result<Option<serde_json::Value>>;

    /// Return up to `query.limit + 1` decoded events matching `query`,
    /// joined with their block and transaction rows, ordered by
    /// `(block.timestamp, chainId, block.number, log.logIndex)` ascending.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn get_log_events(&self, query: LogEventsQuery) -> Result<LogEventsPage>;

    /// Upsert `functionMetadata` progress rows, keyed by `function_id`.
    /// `spec.md` §4.3 "Flush": "Rows with `toCheckpoint == zeroCheckpoint`
    /// are omitted" — callers are expected to filter those out before
    /// calling, the store itself just persists what it's given.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn flush_function_metadata(&self, rows: Vec<FunctionMetadata>) -> Result<()>;

    /// Load every persisted `functionMetadata` row, used to seed scheduler
    /// state on `reset`.
    ///
    /// # Errors
    /// Returns an error if the underlying storage operation fails.
    async fn load_function_metadata(&self) -> Result<Vec<FunctionMetadata>>;
}

/// Fingerprinted key for a single log filter's interval bookkeeping row.
#[must_use]
pub fn log_filter_fragment_id(fragment: &LogFilterFragment) -> String {
    fragment.fingerprint()
}

/// Fingerprinted key for a single factory fragment's interval bookkeeping
/// row.
#[must_use]
pub fn factory_fragment_id(fragment: &FactoryFragment) -> String {
    fragment.fingerprint()
}
