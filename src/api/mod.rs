//! Read-only HTTP surface: `/healthz`, `/metrics`, `/status`.
//!
//! §1 places "GraphQL serving" and any query language over entities out of
//! core scope; this module is the ambient observability surface on top: a
//! small `AppState`, one handler per route, `with_state`, built on Axum +
//! tower-http.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::gateway::SyncGateway;
use crate::scheduler::Scheduler;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    /// The running Sync Gateway, read for `/status`.
    pub gateway: Arc<Mutex<SyncGateway>>,
    /// The running scheduler, read for `has_error`/`is_paused`.
    pub scheduler: Arc<Scheduler>,
    /// Prometheus handle rendering the current metrics snapshot, if metrics
    /// are enabled.
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_text))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// Snapshot of engine progress returned by `/status`.
#[derive(Debug, Serialize)]
struct StatusResponse {
    checkpoint_timestamp: u64,
    finality_checkpoint_timestamp: u64,
    is_historical_complete: bool,
    is_paused: bool,
    has_error: bool,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let gateway = state.gateway.lock();
    Json(StatusResponse {
        checkpoint_timestamp: gateway.checkpoint().block_timestamp,
        finality_checkpoint_timestamp: gateway.finality_checkpoint().block_timestamp,
        is_historical_complete: gateway.is_historical_complete(),
        is_paused: state.scheduler.is_paused(),
        has_error: state.scheduler.has_error(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiRegistry;
    use crate::ports::entity_store::InMemoryEntityStore;
    use crate::store::InMemorySyncStore;
    use crate::types::primitives::ChainId;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct NoopClient;

    #[async_trait::async_trait]
    impl crate::ports::RpcReadClient for NoopClient {
        async fn call(
            &self,
            _chain_id: ChainId,
            _block_number: crate::types::primitives::BlockNumber,
            _request: &str,
        ) -> crate::error::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn test_state() -> AppState {
        let sync_store: Arc<dyn crate::store::SyncStore> = Arc::new(InMemorySyncStore::new());
        let entity_store: Arc<dyn crate::ports::EntityStore> = Arc::new(InMemoryEntityStore::new());
        let client: Arc<dyn crate::ports::RpcReadClient> = Arc::new(NoopClient);
        let scheduler = Arc::new(Scheduler::new(
            sync_store,
            entity_store,
            client,
            AbiRegistry::default(),
            vec![],
            vec![],
            std::collections::HashMap::new(),
            std::collections::HashMap::new(),
        ));
        AppState {
            gateway: Arc::new(Mutex::new(SyncGateway::new([ChainId::new(1)]))),
            scheduler,
            metrics: None,
        }
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_disabled_returns_404() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_reports_zero_checkpoint_for_fresh_gateway() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
