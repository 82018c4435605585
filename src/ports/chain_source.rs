//! The `ChainSource` port: the historical and realtime collectors `spec.md`
//! §6 describes but leaves as external collaborators.
//!
//! A `ChainSource` is the boundary between the core engine and a concrete
//! chain connection. The sync store and gateway only ever see the tuples
//! this trait produces; they never talk to an RPC endpoint directly.

use async_trait::async_trait;

use crate::core::{Checkpoint, Interval, LogFilter};
use crate::error::Result;
use crate::types::entities::{Block, Log, Transaction};

/// One page of historical data: a block, its transactions, the logs it
/// contains that matched the requesting filter, and the interval this page
/// covers.
#[derive(Debug, Clone)]
pub struct HistoricalBatch {
    /// The block this batch describes.
    pub block: Block,
    /// Transactions in `block` that are relevant to the sync (typically
    /// those that emitted a matching log).
    pub transactions: Vec<Transaction>,
    /// Matching logs emitted within `block`.
    pub logs: Vec<Log>,
    /// The block range this batch contributes to the filter's synced
    /// interval bookkeeping. `spec.md` §6: "`interval.endBlock <= chain
    /// finalized head`".
    pub interval: Interval,
}

/// A realtime event pushed by a chain's live-tip collector.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// A new block (and its transactions/logs) has been observed at the
    /// chain's tip. Does not imply finality.
    Block {
        /// The observed block.
        block: Block,
        /// Transactions in the block.
        transactions: Vec<Transaction>,
        /// Logs emitted within the block.
        logs: Vec<Log>,
    },
    /// A block range has become final; its interval may now be recorded via
    /// `insertRealtimeInterval`.
    IntervalFinalized {
        /// The range that is now final.
        interval: Interval,
    },
    /// A shallow reorg was observed; `spec.md` §6:
    /// "`shallowReorg(safeCheckpoint)`".
    ShallowReorg {
        /// The deepest checkpoint known to survive the reorg.
        safe_checkpoint: Checkpoint,
    },
    /// The collector hit an unrecoverable error and can no longer make
    /// progress.
    Fatal {
        /// Human-readable description of the fatal condition.
        reason: String,
    },
}

/// A finality-checkpoint advance, reported independently of realtime tip
/// events so the gateway can track "deepest irrevocable checkpoint"
/// separately from "deepest observed checkpoint".
#[derive(Debug, Clone, Copy)]
pub struct FinalityEvent {
    /// The new finality checkpoint for this collector's chain.
    pub checkpoint: Checkpoint,
}

/// Per-`(chain, source)` historical and realtime collector.
///
/// Implementations push data into the sync store themselves (via
/// `insertLogFilterInterval`/`insertRealtimeBlock`/etc.) and report progress
/// through the streams this trait exposes; the core only consumes the
/// progress signal, never the raw chain connection.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Fetch the next historical batch for `filter` starting at
    /// `from_block`, or `None` once the configured range is exhausted
    /// (`spec.md` §6: "emits `syncComplete` when its configured range is
    /// exhausted").
    ///
    /// # Errors
    /// Returns an error if the underlying RPC call fails.
    async fn next_historical_batch(
        &self,
        filter: &LogFilter,
        from_block: u64,
    ) -> Result<Option<HistoricalBatch>>;

    /// Poll for the next realtime event. Implementations are expected to
    /// await internally (e.g. on a WebSocket subscription) rather than busy
    /// loop.
    ///
    /// # Errors
    /// Returns an error if the underlying connection fails.
    async fn next_realtime_event(&self) -> Result<RealtimeEvent>;

    /// Poll for the next finality advance.
    ///
    /// # Errors
    /// Returns an error if the underlying connection fails.
    async fn next_finality_event(&self) -> Result<FinalityEvent>;
}
