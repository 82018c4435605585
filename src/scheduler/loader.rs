//! Batch loading: pulls decoded events from the sync store into a
//! function's `loadedTasks` buffer, budgeted across every unfinished key.
//!
//! `spec.md` §4.3 "Batch loading".

use metrics::counter;

use crate::core::Checkpoint;
use crate::error::Result;
use crate::metrics::INDEXING_EVENTS_DECODE_FAILED;
use crate::store::sync_store::{LogEventsQuery, SyncStore};

use super::registry::FunctionDeclaration;
use super::{FunctionState, LogEventTask, TaskKind};
use crate::abi::AbiRegistry;

/// Hard ceiling on events loaded across all unfinished keys in one cycle.
pub const MAX_BATCH_SIZE: u32 = 10_000;

/// `budget = floor((MAX_BATCH_SIZE - sum of loaded counts over fully-loaded
/// keys) / count of unfinished keys)`.
///
/// `spec.md` §9 notes the original formula divides by the number of
/// unfinished keys and "relies on `getLoadKeys` having returned an empty
/// list first" when every key is fully loaded — i.e. it is never evaluated
/// with a zero denominator in practice. Rather than reproduce a panic on
/// that path, `unfinished_count == 0` here returns `0`: there is nothing
/// left to budget for.
#[must_use]
pub fn calculate_task_batch_size(fully_loaded_counts: &[u32], unfinished_count: usize) -> u32 {
    if unfinished_count == 0 {
        return 0;
    }
    let consumed: u32 = fully_loaded_counts.iter().sum();
    let remaining = MAX_BATCH_SIZE.saturating_sub(consumed);
    remaining / unfinished_count as u32
}

/// What one `load_indexing_function_tasks` call accomplished, for logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOutcome {
    /// Tasks appended to `state.loaded_tasks`.
    pub loaded: usize,
    /// Events whose ABI decode failed and were dropped.
    pub skipped_decode_failures: usize,
}

/// Pull up to `budget` more decoded events for `decl` into `state`, per
/// `spec.md` §4.3 "Batch loading":
///
/// - `fromCheckpoint` is `state.tasksLoadedToCheckpoint`, `toCheckpoint` is
///   the current gateway checkpoint.
/// - Decode failures are logged and skipped, never block the batch.
/// - `tasksLoadedToCheckpoint` advances to the last checkpoint actually
///   returned if there's more to come, or all the way to `toCheckpoint`
///   once the page is exhausted.
/// - `tasksLoadedFromCheckpoint`/`firstEventCheckpoint` are set the moment
///   the buffer transitions from empty to non-empty.
/// - `lastEventCheckpoint` tracks the newest matching event seen so far,
///   even beyond what was actually loaded into the buffer.
///
/// # Errors
/// Returns an error if the underlying store call fails.
pub async fn load_indexing_function_tasks(
    store: &dyn SyncStore,
    abi: &AbiRegistry,
    decl: &FunctionDeclaration,
    state: &mut FunctionState,
    to_checkpoint: Checkpoint,
    budget: u32,
) -> Result<LoadOutcome> {
    if budget == 0 {
        return Ok(LoadOutcome::default());
    }

    let query = LogEventsQuery {
        from_checkpoint: state.tasks_loaded_to_checkpoint,
        to_checkpoint,
        limit: budget,
        source: decl.sources.clone(),
        contract_name: decl.contract_name.clone(),
        event_name: decl.event_name.clone(),
    };
    let page = store.get_log_events(query).await?;

    let mut skipped = 0usize;
    let mut new_tasks = Vec::with_capacity(page.events.len());
    for event in page.events {
        match abi.decode_event(&decl.contract_name, &decl.event_name, &event.log) {
            Ok(args) => {
                let mut event = event;
                event.args = args;
                new_tasks.push(LogEventTask {
                    function_id: decl.function_id(),
                    checkpoint: event.checkpoint,
                    kind: TaskKind::Log(Box::new(event)),
                    events_processed: None,
                });
            }
            Err(reason) => {
                tracing::warn!(
                    function_id = %decl.function_id(),
                    %reason,
                    "skipping event that failed to decode"
                );
                counter!(
                    INDEXING_EVENTS_DECODE_FAILED,
                    "contract" => decl.contract_name.clone(),
                    "event" => decl.event_name.clone()
                )
                .increment(1);
                skipped += 1;
            }
        }
    }

    let loaded = new_tasks.len();
    if let Some(last) = new_tasks.last_mut() {
        last.events_processed = Some(loaded as u32);
    }

    let was_empty = state.loaded_tasks.is_empty();
    state.loaded_tasks.extend(new_tasks);

    state.tasks_loaded_to_checkpoint = if page.has_next_page {
        page.last_checkpoint_in_page.unwrap_or(state.tasks_loaded_to_checkpoint)
    } else {
        to_checkpoint
    };

    if was_empty {
        if let Some(first) = state.loaded_tasks.front() {
            state.tasks_loaded_from_checkpoint = first.checkpoint;
            if state.first_event_checkpoint.is_none() {
                state.first_event_checkpoint = Some(first.checkpoint);
            }
        }
    }

    if let Some(last_checkpoint) = page.last_checkpoint {
        state.last_event_checkpoint = state.last_event_checkpoint.max_of(last_checkpoint);
    }

    Ok(LoadOutcome { loaded, skipped_decode_failures: skipped })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_splits_remaining_capacity_across_unfinished_keys() {
        assert_eq!(calculate_task_batch_size(&[], 1), MAX_BATCH_SIZE);
        assert_eq!(calculate_task_batch_size(&[], 2), MAX_BATCH_SIZE / 2);
        assert_eq!(calculate_task_batch_size(&[4_000], 2), (MAX_BATCH_SIZE - 4_000) / 2);
    }

    #[test]
    fn zero_unfinished_keys_returns_zero_rather_than_panicking() {
        assert_eq!(calculate_task_batch_size(&[MAX_BATCH_SIZE], 0), 0);
    }

    #[test]
    fn fully_consumed_budget_saturates_to_zero() {
        assert_eq!(calculate_task_batch_size(&[MAX_BATCH_SIZE, MAX_BATCH_SIZE], 1), 0);
    }
}
