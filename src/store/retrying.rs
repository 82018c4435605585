//! [`RetryingSyncStore`]: wraps any [`SyncStore`] so every public operation
//! goes through [`with_retry`] (`spec.md` §4.1 "Retry policy").
//!
//! Kept as a decorator rather than folded into each concrete backend so the
//! retry policy lives in exactly one place regardless of which backend
//! (Postgres, SQLite, or the in-memory fake used in tests, which skips this
//! wrapper entirely since it never fails transiently) is configured.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::{Checkpoint, FactoryFragment, Interval, LogFilter};
use crate::error::Result;
use crate::types::entities::{
    Block, FunctionMetadata, Log, RpcRequestKey, RpcRequestResult, Transaction,
};
use crate::types::primitives::{BlockNumber, ChainId, EthAddress};

use super::retry::with_retry;
use super::sync_store::{LogEventsPage, LogEventsQuery, SyncStore};

/// Decorates an inner [`SyncStore`] with the retry envelope every public
/// operation is wrapped in.
#[derive(Clone)]
pub struct RetryingSyncStore {
    inner: Arc<dyn SyncStore>,
}

impl RetryingSyncStore {
    /// Wrap `inner` with the standard retry policy.
    #[must_use]
    pub const fn new(inner: Arc<dyn SyncStore>) -> Self {
        Self { inner }
    }
}

impl std::fmt::Debug for RetryingSyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingSyncStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl SyncStore for RetryingSyncStore {
    async fn insert_log_filter_interval(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
        interval: Interval,
    ) -> Result<()> {
        with_retry("insert_log_filter_interval", || {
            self.inner.insert_log_filter_interval(
                chain_id,
                log_filter,
                block.clone(),
                transactions.clone(),
                logs.clone(),
                interval,
            )
        })
        .await
    }

    async fn get_log_filter_intervals(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
    ) -> Result<Vec<Interval>> {
        with_retry("get_log_filter_intervals", || {
            self.inner.get_log_filter_intervals(chain_id, log_filter)
        })
        .await
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
        with_retry("insert_factory_log_filter_interval", || {
            self.inner.insert_factory_log_filter_interval(
                chain_id,
                factory,
                block.clone(),
                transactions.clone(),
                logs.clone(),
                interval,
            )
        })
        .await
    }

    async fn get_factory_log_filter_intervals(
        &self,
        chain_id: ChainId,
        factory: &FactoryFragment,
    ) -> Result<Vec<Interval>> {
        with_retry("get_factory_log_filter_intervals", || {
            self.inner.get_factory_log_filter_intervals(chain_id, factory)
        })
        .await
    }

    async fn insert_factory_child_address_logs(
        &self,
        chain_id: ChainId,
        logs: Vec<Log>,
    ) -> Result<()> {
        with_retry("insert_factory_child_address_logs", || {
            self.inner.insert_factory_child_address_logs(chain_id, logs.clone())
        })
        .await
    }

    async fn get_factory_child_addresses(
        &self,
        chain_id: ChainId,
        factory: &FactoryFragment,
        up_to_block_number: BlockNumber,
        after_block_number: BlockNumber,
        page_size: u32,
    ) -> Result<Vec<(BlockNumber, EthAddress)>> {
        with_retry("get_factory_child_addresses", || {
            self.inner.get_factory_child_addresses(
                chain_id,
                factory,
                up_to_block_number,
                after_block_number,
                page_size,
            )
        })
        .await
    }

    async fn insert_realtime_block(
        &self,
        chain_id: ChainId,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
    ) -> Result<()> {
        with_retry("insert_realtime_block", || {
            self.inner.insert_realtime_block(chain_id, block.clone(), transactions.clone(), logs.clone())
        })
        .await
    }

    async fn insert_realtime_interval(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
        interval: Interval,
    ) -> Result<()> {
        with_retry("insert_realtime_interval", || {
            self.inner.insert_realtime_interval(chain_id, log_filter, interval)
        })
        .await
    }

    async fn delete_realtime_data(&self, chain_id: ChainId, from_block: BlockNumber) -> Result<()> {
        with_retry("delete_realtime_data", || {
            self.inner.delete_realtime_data(chain_id, from_block)
        })
        .await
    }

    async fn insert_rpc_request_result(&self, result: RpcRequestResult) -> Result<()> {
        with_retry("insert_rpc_request_result", || {
            self.inner.insert_rpc_request_result(result.clone())
        })
        .await
    }

    async fn get_rpc_request_result(&self, key: &RpcRequestKey) -> Result<Option<serde_json::Value>> {
        with_retry("get_rpc_request_result", || self.inner.get_rpc_request_result(key)).await
    }

    async fn get_log_events(&self, query: LogEventsQuery) -> Result<LogEventsPage> {
        with_retry("get_log_events", || self.inner.get_log_events(query.clone())).await
    }

    async fn flush_function_metadata(&self, rows: Vec<FunctionMetadata>) -> Result<()> {
        with_retry("flush_function_metadata", || {
            self.inner.flush_function_metadata(rows.clone())
        })
        .await
    }

    async fn load_function_metadata(&self) -> Result<Vec<FunctionMetadata>> {
        with_retry("load_function_metadata", || self.inner.load_function_metadata()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySyncStore;

    #[tokio::test]
    async fn delegates_to_inner_store() {
        let inner: Arc<dyn SyncStore> = Arc::new(InMemorySyncStore::new());
        let retrying = RetryingSyncStore::new(Arc::clone(&inner));
        let rows = retrying.load_function_metadata().await.unwrap();
        assert!(rows.is_empty());
    }
}
