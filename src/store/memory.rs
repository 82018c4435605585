//! An in-memory [`SyncStore`], grounded on the teacher's `MockProvider`
//! (`evm-provider/src/mock.rs`): plain `Mutex`-guarded collections standing
//! in for the real backend, enough to drive scheduler and gateway tests
//! without a database.
//!
//! Decoding is out of scope here: `get_log_events` stamps `contract_name`/
//! `event_name` from the query but leaves `args` empty. The scheduler's
//! loader is the one with ABI knowledge; it decodes each returned event
//! before handing it to a user function and drops ones that fail to decode.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Interval, LogFilter, interval_union};
use crate::error::Result;
use crate::types::entities::{
    Block, DecodedEvent, FunctionMetadata, Log, RpcRequestKey, RpcRequestResult, Transaction,
};
use crate::types::primitives::{BlockNumber, ChainId, EthAddress};

use super::sync_store::{EventSource, LogEventsPage, LogEventsQuery, SyncStore};

type BlockKey = (ChainId, B256);
type TxKey = (ChainId, B256);
type IntervalKey = (ChainId, String);

#[derive(Debug, Default)]
struct State {
    blocks: HashMap<BlockKey, Block>,
    transactions: HashMap<TxKey, Transaction>,
    logs: Vec<Log>,
    log_filter_intervals: HashMap<IntervalKey, Vec<Interval>>,
    factory_intervals: HashMap<IntervalKey, Vec<Interval>>,
    rpc_cache: HashMap<RpcRequestKey, Value>,
    function_metadata: HashMap<String, FunctionMetadata>,
}

/// In-memory `SyncStore`. Every operation locks the whole state; fine for
/// tests, wrong for production throughput.
#[derive(Debug, Default)]
pub struct InMemorySyncStore {
    state: Mutex<State>,
}

impl InMemorySyncStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert_block(state: &mut State, block: Block) {
        state.blocks.insert((block.chain_id, block.hash), block);
    }

    fn upsert_transaction(state: &mut State, tx: Transaction) {
        state.transactions.insert((tx.chain_id, tx.hash), tx);
    }

    fn upsert_log(state: &mut State, log: Log) {
        if let Some(existing) = state.logs.iter_mut().find(|l| {
            l.chain_id == log.chain_id && l.block_hash == log.block_hash && l.log_index == log.log_index
        }) {
            *existing = log;
        } else {
            state.logs.push(log);
        }
    }

    fn append_interval(state: &mut State, key: IntervalKey, interval: Interval) {
        state.log_filter_intervals.entry(key).or_default().push(interval);
    }

    fn append_factory_interval(state: &mut State, key: IntervalKey, interval: Interval) {
        state.factory_intervals.entry(key).or_default().push(interval);
    }

    fn compacted_intervals(map: &mut HashMap<IntervalKey, Vec<Interval>>, key: &IntervalKey) -> Vec<Interval> {
        let Some(rows) = map.get_mut(key) else {
            return Vec::new();
        };
        let unioned = interval_union(rows);
        *rows = unioned.clone();
        unioned
    }

    /// Child addresses a factory has announced, derived on the fly from the
    /// logs table rather than materialized eagerly.
    fn child_addresses(state: &State, factory: &crate::core::FactoryFragment) -> Vec<(BlockNumber, Address)> {
        let mut out: Vec<(BlockNumber, Address)> = state
            .logs
            .iter()
            .filter(|log| {
                log.address == factory.factory_address && log.topics[0] == Some(factory.event_selector)
            })
            .filter_map(|log| {
                let topics: Vec<B256> = log.topics.iter().filter_map(|t| *t).collect();
                factory
                    .extract_child_address(&topics, &log.data)
                    .ok()
                    .map(|addr| (log.block_number, addr))
            })
            .collect();
        out.sort_by_key(|(num, _)| *num);
        out
    }
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn insert_log_filter_interval(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
        interval: Interval,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("sync store mutex poisoned");
        Self::upsert_block(&mut state, block);
        for tx in transactions {
            Self::upsert_transaction(&mut state, tx);
        }
        for log in logs {
            Self::upsert_log(&mut state, log);
        }
        for fragment in log_filter.fragments() {
            Self::append_interval(&mut state, (chain_id, fragment.fingerprint()), interval);
        }
        Ok(())
    }

    async fn get_log_filter_intervals(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
    ) -> Result<Vec<Interval>> {
        let mut state = self.state.lock().expect("sync store mutex poisoned");
        let per_fragment: Vec<Vec<Interval>> = log_filter
            .fragments()
            .iter()
            .map(|fragment| {
                Self::compacted_intervals(&mut state.log_filter_intervals, &(chain_id, fragment.fingerprint()))
            })
            .collect();
        Ok(crate::core::interval_intersection_many(&per_fragment))
    }

    async fn insert_factory_log_filter_interval(
        &self,
        chain_id: ChainId,
        factory: &crate::core::FactoryFragment,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
        interval: Interval,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("sync store mutex poisoned");
        Self::upsert_block(&mut state, block);
        for tx in transactions {
            Self::upsert_transaction(&mut state, tx);
        }
        for log in logs {
            Self::upsert_log(&mut state, log);
        }
        Self::append_factory_interval(&mut state, (chain_id, factory.fingerprint()), interval);
        Ok(())
    }

    async fn get_factory_log_filter_intervals(
        &self,
        chain_id: ChainId,
        factory: &crate::core::FactoryFragment,
    ) -> Result<Vec<Interval>> {
        let mut state = self.state.lock().expect("sync store mutex poisoned");
        Ok(Self::compacted_intervals(
            &mut state.factory_intervals,
            &(chain_id, factory.fingerprint()),
        ))
    }

    async fn insert_factory_child_address_logs(&self, _chain_id: ChainId, logs: Vec<Log>) -> Result<()> {
        let mut state = self.state.lock().expect("sync store mutex poisoned");
        for log in logs {
            Self::upsert_log(&mut state, log);
        }
        Ok(())
    }

    async fn get_factory_child_addresses(
        &self,
        _chain_id: ChainId,
        factory: &crate::core::FactoryFragment,
        up_to_block_number: BlockNumber,
        after_block_number: BlockNumber,
        page_size: u32,
    ) -> Result<Vec<(BlockNumber, EthAddress)>> {
        let state = self.state.lock().expect("sync store mutex poisoned");
        let page = Self::child_addresses(&state, factory)
            .into_iter()
            .filter(|(num, _)| *num > after_block_number && *num <= up_to_block_number)
            .take(page_size as usize)
            .map(|(num, addr)| (num, EthAddress::from(addr)))
            .collect();
        Ok(page)
    }

    async fn insert_realtime_block(
        &self,
        _chain_id: ChainId,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("sync store mutex poisoned");
        Self::upsert_block(&mut state, block);
        for tx in transactions {
            Self::upsert_transaction(&mut state, tx);
        }
        for log in logs {
            Self::upsert_log(&mut state, log);
        }
        Ok(())
    }

    async fn insert_realtime_interval(
        &self,
        chain_id: ChainId,
        log_filter: &LogFilter,
        interval: Interval,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("sync store mutex poisoned");
        for fragment in log_filter.fragments() {
            Self::append_interval(&mut state, (chain_id, fragment.fingerprint()), interval);
        }
        Ok(())
    }

    async fn delete_realtime_data(&self, chain_id: ChainId, from_block: BlockNumber) -> Result<()> {
        let mut state = self.state.lock().expect("sync store mutex poisoned");

        state.blocks.retain(|(c, _), b| *c != chain_id || b.number <= from_block);
        state.transactions.retain(|(c, _), t| *c != chain_id || t.block_number <= from_block);
        state.logs.retain(|l| l.chain_id != chain_id || l.block_number <= from_block);
        state.rpc_cache.retain(|k, _| k.chain_id != chain_id || k.block_number <= from_block);

        for (key, rows) in state.log_filter_intervals.iter_mut().chain(state.factory_intervals.iter_mut()) {
            if key.0 != chain_id {
                continue;
            }
            rows.retain(|iv| iv.start_block <= from_block.value());
            for iv in rows.iter_mut() {
                if iv.end_block > from_block.value() {
                    iv.end_block = from_block.value();
                }
            }
        }
        Ok(())
    }

    async fn insert_rpc_request_result(&self, result: RpcRequestResult) -> Result<()> {
        let mut state = self.state.lock().expect("sync store mutex poisoned");
        state.rpc_cache.insert(result.key, result.result);
        Ok(())
    }

    async fn get_rpc_request_result(&self, key: &RpcRequestKey) -> Result<Option<Value>> {
        let state = self.state.lock().expect("sync store mutex poisoned");
        Ok(state.rpc_cache.get(key).cloned())
    }

    async fn flush_function_metadata(&self, rows: Vec<FunctionMetadata>) -> Result<()> {
        let mut state = self.state.lock().expect("sync store mutex poisoned");
        for row in rows {
            state.function_metadata.insert(row.function_id.clone(), row);
        }
        Ok(())
    }

    async fn load_function_metadata(&self) -> Result<Vec<FunctionMetadata>> {
        let state = self.state.lock().expect("sync store mutex poisoned");
        Ok(state.function_metadata.values().cloned().collect())
    }

    async fn get_log_events(&self, query: LogEventsQuery) -> Result<LogEventsPage> {
        let state = self.state.lock().expect("sync store mutex poisoned");

        let matches_log = |log: &Log| -> bool {
            match &query.source {
                EventSource::LogFilters(filters) => filters.iter().any(|(filter, selector)| {
                    log.topics[0] == Some(*selector)
                        && filter.fragments().iter().any(|frag| frag.matches(log.address, &log.topics))
                }),
                EventSource::Factories(factories) => factories.iter().any(|(factory, selector)| {
                    log.topics[0] == Some(*selector)
                        && Self::child_addresses(&state, factory)
                            .iter()
                            .any(|(_, addr)| *addr == log.address)
                }),
            }
        };

        let mut matched: Vec<DecodedEvent> = Vec::new();
        for log in state.logs.iter().filter(|l| matches_log(l)) {
            let Some(block) = state.blocks.get(&(log.chain_id, log.block_hash)) else {
                continue;
            };
            let Some(tx) = state.transactions.get(&(log.chain_id, log.transaction_hash)) else {
                continue;
            };
            let checkpoint = log.checkpoint(block.timestamp);
            if checkpoint <= query.from_checkpoint || checkpoint > query.to_checkpoint {
                continue;
            }
            matched.push(DecodedEvent {
                checkpoint,
                contract_name: query.contract_name.clone(),
                event_name: query.event_name.clone(),
                args: serde_json::Map::new(),
                log: log.clone(),
                block: block.clone(),
                transaction: tx.clone(),
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::FilterSlot;
    use crate::core::{ChildAddressLocation, FactoryFragment, LogFilter};
    use crate::types::primitives::Uint256;
    use alloy::primitives::address;

    fn block(chain: u64, num: u64, ts: u64, hash: B256) -> Block {
        Block {
            chain_id: ChainId::new(chain),
            hash,
            parent_hash: B256::ZERO,
            number: BlockNumber::new(num),
            timestamp: ts,
        }
    }

    fn tx(chain: u64, hash: B256, block_number: u64, block_hash: B256) -> Transaction {
        Transaction {
            chain_id: ChainId::new(chain),
            hash,
            block_number: BlockNumber::new(block_number),
            block_hash,
            transaction_index: 0,
            from: Address::ZERO,
            to: None,
            value: Uint256::ZERO,
        }
    }

    fn log(chain: u64, block_hash: B256, block_number: u64, log_index: u32, address: Address, selector: B256, tx_hash: B256) -> Log {
        Log {
            chain_id: ChainId::new(chain),
            block_hash,
            block_number: BlockNumber::new(block_number),
            log_index,
            transaction_hash: tx_hash,
            address,
            topics: [Some(selector), None, None, None],
            data: vec![],
        }
    }

    #[tokio::test]
    async fn insert_and_query_log_filter_intervals() {
        let store = InMemorySyncStore::new();
        let chain = ChainId::new(1);
        let plain = LogFilter::default();
        let bh = B256::repeat_byte(1);
        store
            .insert_log_filter_interval(
                chain,
                &plain,
                block(1, 100, 1000, bh),
                vec![],
                vec![],
                Interval::new(0, 100),
            )
            .await
            .unwrap();
        let intervals = store.get_log_filter_intervals(chain, &plain).await.unwrap();
        assert_eq!(intervals, vec![Interval::new(0, 100)]);
    }

    #[tokio::test]
    async fn overlapping_intervals_compact_on_read() {
        let store = InMemorySyncStore::new();
        let chain = ChainId::new(1);
        let filter = LogFilter::default();
        for (s, e) in [(0, 100), (50, 200)] {
            store
                .insert_log_filter_interval(
                    chain,
                    &filter,
                    block(1, e, e, B256::repeat_byte(e as u8)),
                    vec![],
                    vec![],
                    Interval::new(s, e),
                )
                .await
                .unwrap();
        }
        let intervals = store.get_log_filter_intervals(chain, &filter).await.unwrap();
        assert_eq!(intervals, vec![Interval::new(0, 200)]);
    }

    #[tokio::test]
    async fn factory_child_addresses_extracted_from_logs() {
        let store = InMemorySyncStore::new();
        let chain = ChainId::new(1);
        let factory_addr = address!("1111111111111111111111111111111111111111");
        let selector = B256::repeat_byte(9);
        let child = address!("2222222222222222222222222222222222222222");

        let bh = B256::repeat_byte(1);
        let mut data = vec![0u8; 32];
        data[12..32].copy_from_slice(&child.0.0);
        let announce = Log {
            chain_id: chain,
            block_hash: bh,
            block_number: BlockNumber::new(10),
            log_index: 0,
            transaction_hash: B256::repeat_byte(2),
            address: factory_addr,
            topics: [Some(selector), None, None, None],
            data,
        };
        store
            .insert_factory_child_address_logs(chain, vec![announce])
            .await
            .unwrap();

        let factory = FactoryFragment {
            factory_address: factory_addr,
            event_selector: selector,
            child_address_location: ChildAddressLocation::DataOffset(0),
        };
        let addrs = store
            .get_factory_child_addresses(chain, &factory, BlockNumber::new(100), BlockNumber::new(0), 10)
            .await
            .unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].1, EthAddress::from(child));
    }

    #[tokio::test]
    async fn get_log_events_orders_and_paginates() {
        let store = InMemorySyncStore::new();
        let chain = ChainId::new(1);
        let addr = address!("3333333333333333333333333333333333333333");
        let selector = B256::repeat_byte(7);
        let filter = LogFilter {
            address: FilterSlot::One(addr),
            topic0: FilterSlot::One(selector),
            ..Default::default()
        };

        for i in 0..5u64 {
            let bh = B256::repeat_byte(i as u8 + 1);
            let th = B256::repeat_byte(i as u8 + 50);
            store
                .insert_log_filter_interval(
                    chain,
                    &LogFilter::default(),
                    block(1, i, 1000 + i, bh),
                    vec![tx(1, th, i, bh)],
                    vec![log(1, bh, i, 0, addr, selector, th)],
                    Interval::new(i, i),
                )
                .await
                .unwrap();
        }

        let page = store
            .get_log_events(LogEventsQuery {
                from_checkpoint: crate::core::Checkpoint::ZERO,
                to_checkpoint: crate::core::Checkpoint::max(),
                limit: 3,
                source: EventSource::LogFilters(vec![(filter, selector)]),
                contract_name: "Pool".into(),
                event_name: "Swap".into(),
            })
            .await
            .unwrap();

        assert_eq!(page.events.len(), 3);
        assert!(page.has_next_page);
        assert!(page.events.windows(2).all(|w| w[0].checkpoint < w[1].checkpoint));
    }
}
