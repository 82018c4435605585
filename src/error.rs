//! Layered error types for the indexing engine.
//!
//! - [`DomainError`] — indexing-logic errors (unknown function keys, bad
//!   dependency graphs, decode failures attributable to user ABIs).
//! - [`InfraError`] — infrastructure errors (database, RPC, cache,
//!   serialization), including the distinguished
//!   [`InfraError::NonRetryable`] and [`InfraError::Cancelled`] kinds the
//!   retry envelope and loading mutex special-case.
//! - [`AppError`] — top-level error combining domain and infra, plus the
//!   engine-level terminal conditions (§7 "Fatal").
//! - [`ApiError`] — HTTP-facing errors for the observability surface.
//!
//! # Error philosophy
//!
//! Transient infra failures are retried (§4.1 "Retry policy", §4.3 "Per-task
//! failure policy"); a [`InfraError::NonRetryable`] short-circuits both retry
//! loops immediately; decode failures are logged and the event is skipped,
//! never propagated as an `AppError`; everything else either surfaces at
//! config-load time or terminates the engine.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Indexing-logic errors: malformed declarations, not faults of the
/// underlying infrastructure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DomainError {
    /// A `(Contract, Event)` key was referenced but never declared.
    #[error("unknown indexing function: {0}")]
    UnknownFunction(String),

    /// Two indexing functions declared conflicting table access that formed
    /// a contradiction the two-pass dependency build couldn't resolve.
    #[error("invalid dependency graph: {0}")]
    InvalidDependencyGraph(String),

    /// An event's `topic0` matched a filter's `eventSelector` but the
    /// payload failed to decode against the declared ABI.
    #[error("event decode failed for {function_key}: {reason}")]
    EventDecodeFailed {
        /// The `(Contract, Event)` key whose ABI failed to decode the log.
        function_key: String,
        /// Decoder-reported reason.
        reason: String,
    },

    /// A checkpoint older than already-processed state was supplied where
    /// monotonicity is required.
    #[error("checkpoint {0} is not monotonically increasing")]
    NonMonotonicCheckpoint(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// INFRASTRUCTURE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Infrastructure-level errors from external systems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// RPC error (Ethereum node communication).
    #[error("RPC error: {0}")]
    Rpc(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event decoding error surfaced from the ABI layer (logged and
    /// skipped by the loader, not propagated as a fatal error).
    #[error("event decoding error: {0}")]
    EventDecoding(String),

    /// Resource not found in storage.
    #[error("resource not found")]
    NotFound,

    /// Connection pool exhausted.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Timeout waiting for operation.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A distinguished non-retryable error. Both the sync store's retry
    /// envelope (§4.1) and the scheduler's per-task retry loop (§4.3)
    /// short-circuit immediately on this variant rather than backing off.
    #[error("non-retryable error: {0}")]
    NonRetryable(String),

    /// Sentinel raised when the cancelable loading mutex (§5) is cancelled
    /// mid-`runExclusive`, e.g. by `reset` or `kill`. Callers must treat
    /// this as "not an error" rather than a real failure.
    #[error("operation cancelled")]
    Cancelled,
}

impl InfraError {
    /// Whether this error is the distinguished non-retryable kind that
    /// should short-circuit retry loops.
    #[must_use]
    pub const fn is_non_retryable(&self) -> bool {
        matches!(self, Self::NonRetryable(_))
    }

    /// Whether this error is the cancellation sentinel.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Application-level errors combining domain and infrastructure errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Domain logic error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure error.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// Chain reorganization detected beyond what the scheduler could absorb
    /// by rewinding to the safe checkpoint.
    #[error("chain reorg detected: {0}")]
    ReorgDetected(String),

    /// Configuration validation error, surfaced before the engine starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Initialization error.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// The indexing scheduler exhausted retries on a task and paused;
    /// `ponder_indexing_has_error` was set.
    #[error("indexing function {function_key} failed after exhausting retries: {source}")]
    IndexingFailed {
        /// The `(Contract, Event)` key whose task failed terminally.
        function_key: String,
        /// Underlying error.
        #[source]
        source: Box<AppError>,
    },

    /// Graceful shutdown requested.
    #[error("shutdown requested")]
    ShutdownRequested,
}

/// Type alias for application Results.
pub type Result<T> = std::result::Result<T, AppError>;

// ═══════════════════════════════════════════════════════════════════════════════
// API ERRORS (HTTP-specific)
// ═══════════════════════════════════════════════════════════════════════════════

/// API-level errors with HTTP status codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Wrapped application error.
    #[error(transparent)]
    App(#[from] AppError),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (with source for logging).
    #[error("internal error")]
    Internal(#[source] eyre::Report),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string()),
            Self::App(AppError::Domain(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string())
            }
            Self::App(
                AppError::Infra(_)
                | AppError::ReorgDetected(_)
                | AppError::Config(_)
                | AppError::Initialization(_)
                | AppError::IndexingFailed { .. }
                | AppError::ShutdownRequested,
            )
            | Self::Internal(_) => {
                tracing::error!(error = ?self, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal error".into(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_display() {
        let err = DomainError::UnknownFunction("Pool:Swap".into());
        assert!(err.to_string().contains("Pool:Swap"));
    }

    #[test]
    fn app_error_from_domain() {
        let domain = DomainError::UnknownFunction("X:Y".into());
        let app: AppError = domain.into();
        assert!(matches!(app, AppError::Domain(DomainError::UnknownFunction(_))));
    }

    #[test]
    fn app_error_from_infra() {
        let infra = InfraError::NotFound;
        let app: AppError = infra.into();
        assert!(matches!(app, AppError::Infra(InfraError::NotFound)));
    }

    #[test]
    fn non_retryable_is_flagged() {
        let err = InfraError::NonRetryable("boom".into());
        assert!(err.is_non_retryable());
        assert!(!InfraError::NotFound.is_non_retryable());
    }

    #[test]
    fn cancelled_is_flagged() {
        assert!(InfraError::Cancelled.is_cancelled());
    }
}
