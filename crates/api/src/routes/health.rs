//! Liveness and store reachability.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::OrderId;
use serde::Serialize;
use store::{Store, StoreError};

use super::orders::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    /// Background jobs that can be run on demand.
    pub jobs: Vec<&'static str>,
}

/// GET /health: 200 when the store answers, 503 otherwise.
pub async fn check<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
) -> (StatusCode, Json<HealthResponse>) {
    let probe = state
        .store
        .query(|uow| {
            Box::pin(async move {
                uow.orders().find_by_id(OrderId::new()).await?;
                Ok::<_, StoreError>(())
            })
        })
        .await;

    let mut jobs: Vec<_> = state.jobs.keys().copied().collect();
    jobs.sort_unstable();

    let (status, store) = match probe {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the store");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    let body = HealthResponse {
        status: if status.is_success() { "ok" } else { "degraded" },
        store,
        jobs,
    };
    (status, Json(body))
}
