//! Dependency-aware dispatch: decides how many of a function's buffered
//! tasks may execute right now without running ahead of the parents it
//! reads from.
//!
//! `spec.md` §4.3 "Dispatch algorithm", 4 cases over
//! `(hasParents, isSelfDependent)`.

use crate::core::Checkpoint;

use super::FunctionState;

/// What [`dispatch_for`] decided for one function this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    /// Nothing ready to dispatch yet.
    None,
    /// Dispatch exactly the first buffered task, serially.
    One,
    /// Dispatch every buffered task at once.
    All,
    /// Dispatch the first `n` buffered tasks.
    Prefix(usize),
}

/// Classify `state`'s buffered tasks given the current
/// `tasksLoadedFromCheckpoint` of each function it depends on.
///
/// - No parents, not self-dependent: nothing can be out of order — dispatch
///   everything buffered (`All`).
/// - No parents, self-dependent: a task may only start once the function's
///   own prior writes are loaded, so tasks run one at a time (`One`), gated
///   on `tasksLoadedFromCheckpoint >= nextTask.checkpoint` trivially holding
///   once the buffer itself has loaded that far.
/// - Has parents, self-dependent: serial (`One`), additionally gated on
///   every parent having loaded at least as far as the next task.
/// - Has parents, not self-dependent: dispatch the longest buffered prefix
///   whose checkpoints are all covered by every parent's load progress.
#[must_use]
pub fn dispatch_for(state: &FunctionState, parents: &[&FunctionState]) -> DispatchDecision {
    let Some(first_checkpoint) = state.loaded_tasks.front().map(|t| t.checkpoint) else {
        return DispatchDecision::None;
    };

    if parents.is_empty() {
        return if state.is_self_dependent {
            if state.tasks_loaded_from_checkpoint >= first_checkpoint {
                DispatchDecision::One
            } else {
                DispatchDecision::None
            }
        } else {
            DispatchDecision::All
        };
    }

    let min_parent_loaded_from = parents
        .iter()
        .map(|p| p.tasks_loaded_from_checkpoint)
        .fold(Checkpoint::max(), Checkpoint::min);

    if state.is_self_dependent {
        let bound = min_parent_loaded_from.min(state.tasks_loaded_from_checkpoint);
        if bound >= first_checkpoint {
            DispatchDecision::One
        } else {
            DispatchDecision::None
        }
    } else {
        let n = state
            .loaded_tasks
            .iter()
            .take_while(|t| t.checkpoint <= min_parent_loaded_from)
            .count();
        if n == 0 {
            DispatchDecision::None
        } else {
            DispatchDecision::Prefix(n)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};

    use super::*;
    use crate::scheduler::{LogEventTask, TaskKind};
    use crate::types::entities::DecodedEvent;
    use crate::types::primitives::{BlockNumber, ChainId};

    fn cp(ts: u64) -> Checkpoint {
        Checkpoint::new(ts, ChainId::new(1), BlockNumber::new(ts), 0)
    }

    fn state_with(
        loaded_from: Checkpoint,
        task_checkpoints: &[u64],
        is_self_dependent: bool,
        parents: HashSet<String>,
    ) -> FunctionState {
        let mut loaded_tasks = VecDeque::new();
        for &ts in task_checkpoints {
            loaded_tasks.push_back(LogEventTask {
                function_id: "Pool:Swap".into(),
                checkpoint: cp(ts),
                kind: TaskKind::Log(Box::new(dummy_event(ts))),
                events_processed: None,
            });
        }
        FunctionState {
            function_id: "Pool:Swap".into(),
            function_name: "Pool:Swap".into(),
            parents,
            is_self_dependent,
            tasks_processed_to_checkpoint: Checkpoint::ZERO,
            tasks_loaded_from_checkpoint: loaded_from,
            tasks_loaded_to_checkpoint: loaded_from,
            loaded_tasks,
            first_event_checkpoint: None,
            last_event_checkpoint: Checkpoint::ZERO,
            event_count: 0,
        }
    }

    fn dummy_event(ts: u64) -> DecodedEvent {
        use crate::types::entities::{Block, Log, Transaction};
        use alloy::primitives::{Address, B256};
        DecodedEvent {
            checkpoint: cp(ts),
            contract_name: "Pool".into(),
            event_name: "Swap".into(),
            args: serde_json::Map::new(),
            log: Log {
                chain_id: ChainId::new(1),
                block_hash: B256::ZERO,
                block_number: BlockNumber::new(ts),
                log_index: 0,
                transaction_hash: B256::ZERO,
                address: Address::ZERO,
                topics: [None, None, None, None],
                data: vec![],
            },
            block: Block {
                chain_id: ChainId::new(1),
                hash: B256::ZERO,
                parent_hash: B256::ZERO,
                number: BlockNumber::new(ts),
                timestamp: ts,
            },
            transaction: Transaction {
                chain_id: ChainId::new(1),
                hash: B256::ZERO,
                block_number: BlockNumber::new(ts),
                block_hash: B256::ZERO,
                transaction_index: 0,
                from: Address::ZERO,
                to: None,
                value: crate::types::primitives::Uint256::ZERO,
            },
        }
    }

    #[test]
    fn case_one_no_parents_not_self_dependent_dispatches_all() {
        let state = state_with(cp(10), &[1, 2, 3], false, HashSet::new());
        assert_eq!(dispatch_for(&state, &[]), DispatchDecision::All);
    }

    #[test]
    fn case_two_no_parents_self_dependent_dispatches_one_when_ready() {
        let state = state_with(cp(5), &[5, 6], true, HashSet::new());
        assert_eq!(dispatch_for(&state, &[]), DispatchDecision::One);
    }

    #[test]
    fn case_two_no_parents_self_dependent_waits_when_buffer_outran_loader() {
        let mut state = state_with(cp(5), &[5, 6], true, HashSet::new());
        state.tasks_loaded_from_checkpoint = cp(4);
        assert_eq!(dispatch_for(&state, &[]), DispatchDecision::None);
    }

    #[test]
    fn case_three_has_parents_self_dependent_gated_on_slowest_parent() {
        let state = state_with(cp(10), &[5, 6], true, HashSet::from(["Factory:PoolCreated".into()]));
        let fast_parent = state_with(cp(10), &[], false, HashSet::new());
        let slow_parent = state_with(cp(4), &[], false, HashSet::new());

        assert_eq!(dispatch_for(&state, &[&fast_parent]), DispatchDecision::One);
        assert_eq!(dispatch_for(&state, &[&slow_parent]), DispatchDecision::None);
    }

    #[test]
    fn case_four_has_parents_not_self_dependent_dispatches_covered_prefix() {
        let state = state_with(cp(10), &[1, 2, 3, 10], false, HashSet::from(["Factory:PoolCreated".into()]));
        let parent = state_with(cp(2), &[], false, HashSet::new());
        assert_eq!(dispatch_for(&state, &[&parent]), DispatchDecision::Prefix(2));
    }

    #[test]
    fn empty_buffer_never_dispatches() {
        let state = state_with(cp(10), &[], false, HashSet::new());
        assert_eq!(dispatch_for(&state, &[]), DispatchDecision::None);
    }
}
