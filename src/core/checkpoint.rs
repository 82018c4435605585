//! Checkpoint algebra: a total order over events from any number of chains.
//!
//! A [`Checkpoint`] is the 4-tuple `(blockTimestamp, chainId, blockNumber,
//! logIndex)`. Ordering is lexicographic in that field order, which is what
//! lets the [sync gateway](crate::gateway::SyncGateway) fuse per-chain
//! progress into one monotone global checkpoint and what lets the
//! [sync store](crate::store::sync_store) deliver a single, totally ordered
//! event stream across chains.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::primitives::{BlockNumber, ChainId};

/// Whether a missing `logIndex` should compare as the smallest or largest
/// possible index within its block.
///
/// `spec.md` §3: "a missing `logIndex` represents *end-of-block* and
/// compares greater than any concrete index when used as an upper bound and
/// less than any concrete index as a lower bound — callers specify which via
/// an inclusive/exclusive flag." `Bound` is that flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// A missing `logIndex` sorts before every concrete index.
    Lower,
    /// A missing `logIndex` sorts after every concrete index.
    Upper,
}

/// A point in the total order over cross-chain events.
///
/// `logIndex` is optional: a checkpoint with no `logIndex` denotes
/// end-of-block and only compares meaningfully once a [`Bound`] resolves the
/// missing-index ambiguity, via [`Checkpoint::cmp_with_bound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Block timestamp, the primary ordering key.
    pub block_timestamp: u64,
    /// Chain id, breaks ties between blocks minted at the same timestamp.
    pub chain_id: ChainId,
    /// Block number within `chain_id`.
    pub block_number: BlockNumber,
    /// Log index within the block, or `None` for end-of-block.
    pub log_index: Option<u32>,
}

impl Checkpoint {
    /// The all-zero checkpoint; the lower bound of every valid range.
    pub const ZERO: Self = Self {
        block_timestamp: 0,
        chain_id: ChainId::new(0),
        block_number: BlockNumber::new(0),
        log_index: Some(0),
    };

    /// Construct a checkpoint pointing at a specific log.
    #[must_use]
    pub const fn new(
        block_timestamp: u64,
        chain_id: ChainId,
        block_number: BlockNumber,
        log_index: u32,
    ) -> Self {
        Self {
            block_timestamp,
            chain_id,
            block_number,
            log_index: Some(log_index),
        }
    }

    /// Construct an end-of-block checkpoint (no `logIndex`).
    #[must_use]
    pub const fn end_of_block(
        block_timestamp: u64,
        chain_id: ChainId,
        block_number: BlockNumber,
    ) -> Self {
        Self {
            block_timestamp,
            chain_id,
            block_number,
            log_index: None,
        }
    }

    /// The all-zero checkpoint.
    #[must_use]
    pub const fn zero() -> Self {
        Self::ZERO
    }

    /// The saturated maximum checkpoint; the upper bound of every valid range.
    #[must_use]
    pub const fn max() -> Self {
        Self {
            block_timestamp: u64::MAX,
            chain_id: ChainId::new(u64::MAX),
            block_number: BlockNumber::new(u64::MAX),
            log_index: Some(u32::MAX),
        }
    }

    /// Compare two checkpoints, resolving a missing `logIndex` on either side
    /// according to `bound`.
    ///
    /// `bound` describes how *this* checkpoint's missing `logIndex` (if any)
    /// should be treated; `other`'s missing index (if any) is resolved with
    /// the opposite convention, matching the half-open range semantics a
    /// caller establishes when it picks `fromCheckpoint`/`toCheckpoint`.
    #[must_use]
    pub fn cmp_with_bound(&self, other: &Self, bound: Bound) -> Ordering {
        let key = |c: &Self, b: Bound| {
            let resolved_index = match c.log_index {
                Some(i) => i64::from(i),
                None => match b {
                    Bound::Lower => -1,
                    Bound::Upper => i64::from(u32::MAX) + 1,
                },
            };
            (
                c.block_timestamp,
                c.chain_id.value(),
                c.block_number.value(),
                resolved_index,
            )
        };
        let opposite = match bound {
            Bound::Lower => Bound::Upper,
            Bound::Upper => Bound::Lower,
        };
        key(self, bound).cmp(&key(other, opposite))
    }

    /// Returns the lesser of two checkpoints under total order with concrete
    /// (non-`None`) log indices treated as both lower and upper consistently.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        if self <= other { self } else { other }
    }

    /// Returns the greater of two checkpoints.
    #[must_use]
    pub fn max_of(self, other: Self) -> Self {
        if self >= other { self } else { other }
    }

    /// Zero-padded, lexicographically-sortable string encoding.
    ///
    /// Used by the SQL-backed entity store adapters to persist
    /// `_checkpoint_created`/`_checkpoint_deleted` bookkeeping as a single
    /// column that still orders correctly under a plain string comparison,
    /// the same zero-padding trick [`crate::types::primitives::Uint256`]
    /// uses for its SQLite encoding. A missing `logIndex` is only
    /// meaningful as a range bound (`cmp_with_bound`); checkpoints recorded
    /// against an executed task always carry a concrete index, so this
    /// encodes `None` as `u32::MAX` (end-of-block, the `Bound::Upper`
    /// convention `Ord` itself uses).
    #[must_use]
    pub fn sort_key(&self) -> String {
        format!(
            "{:020}-{:020}-{:020}-{:010}",
            self.block_timestamp,
            self.chain_id.value(),
            self.block_number.value(),
            self.log_index.unwrap_or(u32::MAX),
        )
    }
}

impl PartialOrd for Checkpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Checkpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        // Both sides use the "upper" convention for a missing index when
        // compared without an explicit bound, matching `maxCheckpoint`'s
        // saturated log index and `zeroCheckpoint`'s concrete zero index.
        self.cmp_with_bound(other, Bound::Upper)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.log_index {
            Some(idx) => write!(
                f,
                "({}, {}, {}, {idx})",
                self.block_timestamp,
                self.chain_id,
                self.block_number,
            ),
            None => write!(
                f,
                "({}, {}, {}, -)",
                self.block_timestamp, self.chain_id, self.block_number,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp(ts: u64, chain: u64, block: u64, log: u32) -> Checkpoint {
        Checkpoint::new(ts, ChainId::new(chain), BlockNumber::new(block), log)
    }

    #[test]
    fn orders_by_timestamp_first() {
        assert!(cp(10, 99, 0, 0) < cp(11, 1, 0, 0));
    }

    #[test]
    fn orders_by_chain_id_on_timestamp_tie() {
        assert!(cp(10, 1, 100, 0) < cp(10, 2, 0, 0));
    }

    #[test]
    fn orders_by_block_number_on_chain_tie() {
        assert!(cp(10, 1, 100, 5) < cp(10, 1, 101, 0));
    }

    #[test]
    fn orders_by_log_index_last() {
        assert!(cp(10, 1, 100, 5) < cp(10, 1, 100, 6));
    }

    #[test]
    fn zero_is_smallest() {
        assert!(Checkpoint::ZERO <= cp(0, 0, 0, 0));
        assert!(Checkpoint::ZERO < cp(1, 0, 0, 0));
    }

    #[test]
    fn max_is_largest() {
        assert!(Checkpoint::max() > cp(u64::MAX - 1, u64::MAX, u64::MAX, u32::MAX));
    }

    #[test]
    fn end_of_block_as_upper_bound_beats_any_concrete_index() {
        let eob = Checkpoint::end_of_block(10, ChainId::new(1), BlockNumber::new(100));
        let concrete = cp(10, 1, 100, u32::MAX);
        assert_eq!(
            eob.cmp_with_bound(&concrete, Bound::Upper),
            Ordering::Greater
        );
    }

    #[test]
    fn end_of_block_as_lower_bound_loses_to_any_concrete_index() {
        let eob = Checkpoint::end_of_block(10, ChainId::new(1), BlockNumber::new(100));
        let concrete = cp(10, 1, 100, 0);
        assert_eq!(eob.cmp_with_bound(&concrete, Bound::Lower), Ordering::Less);
    }

    #[test]
    fn min_and_max_of_pick_correctly() {
        let a = cp(10, 1, 100, 0);
        let b = cp(11, 1, 100, 0);
        assert_eq!(a.min(b), a);
        assert_eq!(a.max_of(b), b);
    }

    #[test]
    fn sort_key_orders_the_same_as_ord() {
        let a = cp(10, 1, 100, 5);
        let b = cp(10, 1, 100, 6);
        let c = cp(11, 0, 0, 0);
        assert!(a.sort_key() < b.sort_key());
        assert!(b.sort_key() < c.sort_key());
    }

    #[test]
    fn scenario_two_chain_minimum() {
        // §8 scenario 2: chain 1 advances to (10,1,..), chain 10 to (12,10,..),
        // chain 1 to (15,1,..). The global minimum tracks chain 1 until it
        // surpasses chain 10's value.
        let c1_a = cp(10, 1, 100, 0);
        let c10 = cp(12, 10, 50, 0);
        let c1_b = cp(15, 1, 105, 0);
        assert_eq!(c1_a.min(c10), c1_a);
        assert_eq!(c1_b.min(c10), c10);
    }
}
