//! Structured logging setup.
//!
//! Driven by [`LoggingSettings`](crate::config::LoggingSettings) rather than
//! raw CLI flags: an `EnvFilter` layered under a `fmt` formatter, plus
//! optional `tracing-appender` file rotation and a pretty/JSON format choice.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingSettings;
use crate::error::AppError;

/// Guards returned by [`init`]. Drop order matters: holding this for the
/// life of the process keeps the non-blocking file writer's background
/// thread alive. Dropping it early silently stops log output.
#[must_use = "dropping the guard stops file logging"]
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global `tracing` subscriber from `settings`.
///
/// `settings.level` seeds the filter when `RUST_LOG` is unset via
/// `EnvFilter::try_from_default_env().unwrap_or_else(|_|
/// EnvFilter::new(level))`. `settings.format` selects between a
/// human-readable formatter (anything other than `"json"`) and structured
/// JSON, and `settings.file_path`, if set, additionally mirrors output to a
/// daily-rotated file via `tracing-appender`.
///
/// # Errors
/// Returns [`AppError::Initialization`] if a global subscriber is already
/// installed.
pub fn init(settings: &LoggingSettings) -> Result<TelemetryGuard, AppError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let json = settings.format.eq_ignore_ascii_case("json");

    let file_layer_guard = settings.file_path.as_ref().map(|raw| {
        let path = Path::new(raw);
        let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("indexer.log").to_owned();
        tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_name))
    });

    let registry = tracing_subscriber::registry().with(filter);

    let init_result = match (json, &file_layer_guard) {
        (true, Some((writer, _))) => registry
            .with(fmt::layer().json())
            .with(fmt::layer().json().with_writer(writer.clone()).with_ansi(false))
            .try_init(),
        (true, None) => registry.with(fmt::layer().json()).try_init(),
        (false, Some((writer, _))) => registry
            .with(fmt::layer())
            .with(fmt::layer().with_writer(writer.clone()).with_ansi(false))
            .try_init(),
        (false, None) => registry.with(fmt::layer()).try_init(),
    };

    init_result
        .map_err(|err| AppError::Initialization(format!("failed to install tracing subscriber: {err}")))?;

    Ok(TelemetryGuard {
        _file_guard: file_layer_guard.map(|(_, guard)| guard),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_is_case_insensitive() {
        let settings = LoggingSettings {
            level: "info".into(),
            format: "JSON".into(),
            file_path: None,
        };
        assert!(settings.format.eq_ignore_ascii_case("json"));
    }
}
