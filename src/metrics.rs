//! Process and indexing metrics.
//!
//! Prometheus-style histograms/counters/gauges with `ponder_`-prefixed
//! names, per §6. This module declares the ones the engine actually emits
//! and installs a `metrics-exporter-prometheus` recorder behind
//! [`MetricsSettings`]: a settings-gated installer paired with the `metrics`
//! crate's free-function macros at call sites.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsSettings;
use crate::error::AppError;

/// Gauge: `1` while the scheduler is paused (initial state, mid-load, or
/// after a terminal task failure), `0` while dispatching normally.
pub const INDEXING_IS_PAUSED: &str = "ponder_indexing_has_paused";
/// Gauge: `1` once the scheduler has paused after exhausting a task's
/// retries, matching `Scheduler::has_error`.
pub const INDEXING_HAS_ERROR: &str = "ponder_indexing_has_error";
/// Counter: events successfully processed, labeled by `function`.
pub const INDEXING_EVENTS_PROCESSED: &str = "ponder_indexing_events_processed_total";
/// Counter: events dropped because ABI decoding failed, labeled by
/// `contract`/`event`.
pub const INDEXING_EVENTS_DECODE_FAILED: &str = "ponder_indexing_events_decode_failed_total";
/// Histogram: wall-clock seconds spent executing one task, labeled by
/// `function`.
pub const INDEXING_TASK_DURATION: &str = "ponder_indexing_task_duration_seconds";
/// Gauge: the Sync Gateway's current global checkpoint timestamp.
pub const SYNC_GATEWAY_CHECKPOINT_TIMESTAMP: &str = "ponder_sync_gateway_checkpoint_timestamp";
/// Counter: chain reorgs handled, labeled by `chain`.
pub const SYNC_REORG_COUNT: &str = "ponder_sync_reorg_total";
/// Histogram: retry backoff attempts consumed by a single sync store call,
/// labeled by `op`.
pub const SYNC_STORE_RETRY_ATTEMPTS: &str = "ponder_sync_store_retry_attempts";

/// Describe every metric this crate emits. Called once, right after the
/// recorder is installed, so `/metrics` reports help text even before the
/// first observation.
fn describe() {
    metrics::describe_gauge!(INDEXING_IS_PAUSED, "1 while the indexing scheduler is paused");
    metrics::describe_gauge!(INDEXING_HAS_ERROR, "1 once a task has exhausted its retries");
    metrics::describe_counter!(INDEXING_EVENTS_PROCESSED, "events successfully processed per function");
    metrics::describe_counter!(INDEXING_EVENTS_DECODE_FAILED, "events dropped due to ABI decode failure");
    metrics::describe_histogram!(INDEXING_TASK_DURATION, "seconds spent executing one indexing task");
    metrics::describe_gauge!(SYNC_GATEWAY_CHECKPOINT_TIMESTAMP, "current global checkpoint timestamp");
    metrics::describe_counter!(SYNC_REORG_COUNT, "chain reorgs handled per chain");
    metrics::describe_histogram!(SYNC_STORE_RETRY_ATTEMPTS, "retry attempts consumed per sync store call");
}

/// Install the global Prometheus recorder and return its handle, which
/// renders the current snapshot on demand (used by the `/metrics` HTTP
/// route in [`crate::api`]).
///
/// Returns `None` if `settings.enabled` is `false`; callers should skip
/// mounting the `/metrics` route in that case.
///
/// # Errors
/// Returns [`AppError::Initialization`] if a recorder is already installed.
pub fn install(settings: &MetricsSettings) -> Result<Option<PrometheusHandle>, AppError> {
    if !settings.enabled {
        return Ok(None);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| AppError::Initialization(format!("failed to install metrics recorder: {err}")))?;
    describe();
    Ok(Some(handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_settings_skip_installation() {
        let settings = MetricsSettings { enabled: false, host: "127.0.0.1".into(), port: 9000 };
        assert!(install(&settings).unwrap().is_none());
    }
}
