//! Sync Gateway: fuses per-chain historical/realtime/finality progress into
//! one monotone global checkpoint.
//!
//! A small, synchronous state object the rest of the engine consults; unlike
//! a store-backed checkpoint manager, this one holds no I/O handle at all —
//! `spec.md` §5 treats gateway operations as single-threaded event handlers
//! over a reducer that is pure over current state. Per-chain bookkeeping is a
//! plain `HashMap` since the gateway only ever reduces in-memory events
//! emitted by the (out-of-core) historical/realtime collectors.

use std::collections::HashMap;

use metrics::{counter, gauge};

use crate::core::Checkpoint;
use crate::metrics::{SYNC_GATEWAY_CHECKPOINT_TIMESTAMP, SYNC_REORG_COUNT};
use crate::types::primitives::ChainId;

/// Per-chain progress tracked by the gateway.
///
/// All fields default to [`Checkpoint::ZERO`], matching `spec.md` §4.2:
/// "All default to `zeroCheckpoint`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PerChainState {
    historical_checkpoint: Checkpoint,
    realtime_checkpoint: Checkpoint,
    finality_checkpoint: Checkpoint,
    is_historical_complete: bool,
}

impl Default for PerChainState {
    fn default() -> Self {
        Self {
            historical_checkpoint: Checkpoint::ZERO,
            realtime_checkpoint: Checkpoint::ZERO,
            finality_checkpoint: Checkpoint::ZERO,
            is_historical_complete: false,
        }
    }
}

impl PerChainState {
    /// `spec.md` §4.2 global reducer: `isHistoricalComplete[i] ?
    /// max(historical[i], realtime[i]) : historical[i]`.
    fn best(&self) -> Checkpoint {
        if self.is_historical_complete {
            self.historical_checkpoint.max_of(self.realtime_checkpoint)
        } else {
            self.historical_checkpoint
        }
    }
}

/// Events a [`SyncGateway`] handler may emit. At most one is produced per
/// call, following the "emit iff strictly advanced" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
    /// The global checkpoint strictly advanced.
    NewCheckpoint(Checkpoint),
    /// The global finality checkpoint strictly advanced.
    NewFinalityCheckpoint(Checkpoint),
    /// A reorg was signaled down to this safe checkpoint.
    Reorg(Checkpoint),
}

/// Cross-chain checkpoint reducer.
///
/// A pure, synchronous state machine: every `handle_*` method takes `&mut
/// self` and an event, updates per-chain state, and returns the
/// [`GatewayEvent`] to emit, if any. No I/O, no retries — "Sync Gateway never
/// fails" (`spec.md` §7); out-of-order or stale inputs are silently absorbed
/// by the monotonicity checks rather than rejected.
///
/// The gateway is constructed with the full set of chain ids the engine is
/// configured for (`spec.md` §4.2: "For each chain id: ... All default to
/// `zeroCheckpoint`"). A configured chain that hasn't reported anything yet
/// still contributes its zero floor to the global minimum — otherwise the
/// global checkpoint could advance past a chain that hasn't started syncing,
/// which would break the "totally ordered event delivery" this reducer
/// exists to guarantee.
#[derive(Debug, Clone, Default)]
pub struct SyncGateway {
    per_chain: HashMap<ChainId, PerChainState>,
    checkpoint: Checkpoint,
    finality_checkpoint: Checkpoint,
}

impl SyncGateway {
    /// Construct a gateway tracking exactly `chain_ids`, each starting at
    /// the all-zero per-chain state. Global checkpoints start at
    /// [`Checkpoint::ZERO`].
    #[must_use]
    pub fn new(chain_ids: impl IntoIterator<Item = ChainId>) -> Self {
        let per_chain = chain_ids
            .into_iter()
            .map(|id| (id, PerChainState::default()))
            .collect();
        Self {
            per_chain,
            checkpoint: Checkpoint::ZERO,
            finality_checkpoint: Checkpoint::ZERO,
        }
    }

    /// The last emitted global checkpoint.
    #[must_use]
    pub const fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    /// The last emitted global finality checkpoint.
    #[must_use]
    pub const fn finality_checkpoint(&self) -> Checkpoint {
        self.finality_checkpoint
    }

    /// Whether every chain registered so far has completed its historical
    /// backfill. A gateway with no chains registered is vacuously complete.
    #[must_use]
    pub fn is_historical_complete(&self) -> bool {
        self.per_chain.values().all(|s| s.is_historical_complete)
    }

    fn entry(&mut self, chain_id: ChainId) -> &mut PerChainState {
        self.per_chain.entry(chain_id).or_default()
    }

    /// Recompute the global checkpoint from per-chain state and emit iff it
    /// strictly advanced.
    ///
    /// A gateway with no registered chains has no `best()` to take a minimum
    /// over; recomputation is then a no-op, matching the "all default to
    /// zeroCheckpoint" starting state.
    fn recompute_checkpoint(&mut self) -> Option<GatewayEvent> {
        let candidate = self.per_chain.values().map(PerChainState::best).min()?;
        if candidate > self.checkpoint {
            self.checkpoint = candidate;
            gauge!(SYNC_GATEWAY_CHECKPOINT_TIMESTAMP).set(candidate.block_timestamp as f64);
            Some(GatewayEvent::NewCheckpoint(candidate))
        } else {
            None
        }
    }

    /// Recompute the global finality checkpoint and emit iff it strictly
    /// advanced.
    fn recompute_finality(&mut self) -> Option<GatewayEvent> {
        let candidate = self
            .per_chain
            .values()
            .map(|s| s.finality_checkpoint)
            .min()?;
        if candidate > self.finality_checkpoint {
            self.finality_checkpoint = candidate;
            Some(GatewayEvent::NewFinalityCheckpoint(candidate))
        } else {
            None
        }
    }

    /// `handleNewHistoricalCheckpoint(c)`.
    pub fn handle_new_historical_checkpoint(&mut self, c: Checkpoint) -> Option<GatewayEvent> {
        let chain_id = c.chain_id;
        let state = self.entry(chain_id);
        if c > state.historical_checkpoint {
            state.historical_checkpoint = c;
        }
        self.recompute_checkpoint()
    }

    /// `handleHistoricalSyncComplete({chainId})`.
    pub fn handle_historical_sync_complete(&mut self, chain_id: ChainId) -> Option<GatewayEvent> {
        self.entry(chain_id).is_historical_complete = true;
        self.recompute_checkpoint()
    }

    /// `handleNewRealtimeCheckpoint(c)`. Only affects the global checkpoint
    /// once every registered chain has completed its historical backfill.
    pub fn handle_new_realtime_checkpoint(&mut self, c: Checkpoint) -> Option<GatewayEvent> {
        let chain_id = c.chain_id;
        let state = self.entry(chain_id);
        if c > state.realtime_checkpoint {
            state.realtime_checkpoint = c;
        }
        if self.is_historical_complete() {
            self.recompute_checkpoint()
        } else {
            None
        }
    }

    /// `handleNewFinalityCheckpoint(c)`.
    pub fn handle_new_finality_checkpoint(&mut self, c: Checkpoint) -> Option<GatewayEvent> {
        let chain_id = c.chain_id;
        let state = self.entry(chain_id);
        if c > state.finality_checkpoint {
            state.finality_checkpoint = c;
        }
        self.recompute_finality()
    }

    /// `handleReorg(safeCheckpoint)`. The gateway itself has no state to
    /// roll back; it simply relays the signal for the scheduler to act on.
    #[must_use]
    pub fn handle_reorg(safe_checkpoint: Checkpoint) -> GatewayEvent {
        counter!(SYNC_REORG_COUNT, "chain" => safe_checkpoint.chain_id.to_string()).increment(1);
        GatewayEvent::Reorg(safe_checkpoint)
    }

    /// `resetCheckpoints({chainId})`: clear per-chain state for `chain_id`
    /// and reset the global checkpoint and finality checkpoint to zero.
    ///
    /// `spec.md` resets the *global* checkpoints unconditionally, not just
    /// when the reset chain held the minimum; callers that reset one of
    /// several chains will see other chains' progress re-discovered on their
    /// next event.
    pub fn reset_checkpoints(&mut self, chain_id: ChainId) {
        self.per_chain.insert(chain_id, PerChainState::default());
        self.checkpoint = Checkpoint::ZERO;
        self.finality_checkpoint = Checkpoint::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::primitives::BlockNumber;

    fn cp(ts: u64, chain: u64, block: u64, log: u32) -> Checkpoint {
        Checkpoint::new(ts, ChainId::new(chain), BlockNumber::new(block), log)
    }

    fn chains(ids: impl IntoIterator<Item = u64>) -> SyncGateway {
        SyncGateway::new(ids.into_iter().map(ChainId::new))
    }

    #[test]
    fn scenario_1_single_chain_advance() {
        // spec.md §8 scenario 1.
        let mut gw = chains([1]);
        let event = gw.handle_new_historical_checkpoint(cp(10, 1, 100, 0));
        assert_eq!(event, Some(GatewayEvent::NewCheckpoint(cp(10, 1, 100, 0))));
        assert_eq!(gw.checkpoint(), cp(10, 1, 100, 0));
    }

    #[test]
    fn scenario_2_two_chain_minimum() {
        // spec.md §8 scenario 2. Both chains are configured up front, so a
        // silent chain 10 floors the global checkpoint at zero until it
        // reports its own first value — otherwise the "minimum across
        // chains" reducer would let chain 1 race ahead of a chain that
        // hasn't started syncing at all.
        let mut gw = chains([1, 10]);

        let e1 = gw.handle_new_historical_checkpoint(cp(10, 1, 100, 0));
        assert_eq!(e1, None); // chain 10 hasn't reported; global floor is still zero.

        // Chain 10 reports; the binding minimum is now chain 1's value.
        let e2 = gw.handle_new_historical_checkpoint(cp(12, 10, 50, 0));
        assert_eq!(e2, Some(GatewayEvent::NewCheckpoint(cp(10, 1, 100, 0))));

        // Chain 1 advances past chain 10; the minimum flips to chain 10.
        let e3 = gw.handle_new_historical_checkpoint(cp(15, 1, 105, 0));
        assert_eq!(e3, Some(GatewayEvent::NewCheckpoint(cp(12, 10, 50, 0))));
        assert_eq!(gw.checkpoint(), cp(12, 10, 50, 0));
    }

    #[test]
    fn scenario_3_realtime_gated_by_completeness() {
        // spec.md §8 scenario 3.
        let mut gw = chains([1, 10]);

        // Both chains historical-incomplete: realtime alone yields nothing.
        let e1 = gw.handle_new_realtime_checkpoint(cp(25, 1, 250, 0));
        assert_eq!(e1, None);

        // Chain 1 completes; its best becomes its realtime value, but chain
        // 10 (still incomplete, still at its zero default) keeps the global
        // floor at zero.
        gw.handle_historical_sync_complete(ChainId::new(1));

        // Chain 10 reports a historical checkpoint below chain 1's realtime
        // value: it becomes the new binding minimum.
        let e2 = gw.handle_new_historical_checkpoint(cp(12, 10, 50, 0));
        assert_eq!(e2, Some(GatewayEvent::NewCheckpoint(cp(12, 10, 50, 0))));

        // Chain 10 completes and reports a realtime checkpoint past its own
        // historical value; both chains are now historical-complete, so
        // their bests are `max(historical, realtime)`. Chain 1's best
        // (already (25,1,250,0), set when it reported realtime above) is
        // lower than chain 10's new best, so it becomes the new minimum.
        gw.handle_historical_sync_complete(ChainId::new(10));
        let e3 = gw.handle_new_realtime_checkpoint(cp(27, 10, 60, 0));
        assert_eq!(e3, Some(GatewayEvent::NewCheckpoint(cp(25, 1, 250, 0))));

        // Re-delivering chain 1's already-known realtime value is a no-op.
        let e4 = gw.handle_new_realtime_checkpoint(cp(25, 1, 250, 0));
        assert_eq!(e4, None);
    }

    #[test]
    fn historical_sync_complete_lets_realtime_raise_the_floor() {
        let mut gw = chains([1]);
        gw.handle_new_historical_checkpoint(cp(10, 1, 100, 0));
        gw.handle_historical_sync_complete(ChainId::new(1));
        let event = gw.handle_new_realtime_checkpoint(cp(20, 1, 200, 0));
        assert_eq!(event, Some(GatewayEvent::NewCheckpoint(cp(20, 1, 200, 0))));
    }

    #[test]
    fn finality_checkpoint_tracks_minimum_independently() {
        // Finality has no completeness gate, only the same
        // configured-chains-floor-at-zero rule as the main checkpoint.
        let mut gw = chains([1, 10]);
        let e1 = gw.handle_new_finality_checkpoint(cp(5, 1, 50, 0));
        assert_eq!(e1, None); // chain 10 hasn't reported finality yet.

        let e2 = gw.handle_new_finality_checkpoint(cp(8, 10, 80, 0));
        assert_eq!(
            e2,
            Some(GatewayEvent::NewFinalityCheckpoint(cp(5, 1, 50, 0)))
        );

        let e3 = gw.handle_new_finality_checkpoint(cp(9, 1, 90, 0));
        assert_eq!(
            e3,
            Some(GatewayEvent::NewFinalityCheckpoint(cp(8, 10, 80, 0)))
        );
    }

    #[test]
    fn stale_historical_checkpoint_is_ignored() {
        let mut gw = chains([1]);
        gw.handle_new_historical_checkpoint(cp(10, 1, 100, 0));
        let event = gw.handle_new_historical_checkpoint(cp(5, 1, 50, 0));
        assert_eq!(event, None);
        assert_eq!(gw.checkpoint(), cp(10, 1, 100, 0));
    }

    #[test]
    fn reorg_emits_signal_without_touching_state() {
        let mut gw = chains([1]);
        gw.handle_new_historical_checkpoint(cp(10, 1, 100, 0));
        let event = SyncGateway::handle_reorg(cp(5, 1, 50, 0));
        assert_eq!(event, GatewayEvent::Reorg(cp(5, 1, 50, 0)));
        // Gateway's own checkpoint is untouched; the scheduler and entity
        // store are what actually roll back.
        assert_eq!(gw.checkpoint(), cp(10, 1, 100, 0));
    }

    #[test]
    fn reset_checkpoints_clears_chain_and_global_state() {
        let mut gw = chains([1]);
        gw.handle_new_historical_checkpoint(cp(10, 1, 100, 0));
        gw.handle_new_finality_checkpoint(cp(5, 1, 50, 0));
        gw.reset_checkpoints(ChainId::new(1));
        assert_eq!(gw.checkpoint(), Checkpoint::ZERO);
        assert_eq!(gw.finality_checkpoint(), Checkpoint::ZERO);
        // `resetCheckpoints` also clears `isHistoricalSyncComplete`.
        assert!(!gw.is_historical_complete());
    }

    #[test]
    fn monotonicity_holds_across_successive_emissions() {
        let mut gw = chains([1]);
        let mut last = Checkpoint::ZERO;
        for (ts, block) in [(10, 100), (20, 200), (30, 300)] {
            if let Some(GatewayEvent::NewCheckpoint(c)) =
                gw.handle_new_historical_checkpoint(cp(ts, 1, block, 0))
            {
                assert!(c > last);
                last = c;
            }
        }
    }
}
