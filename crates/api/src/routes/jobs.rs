//! On-demand job runs.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use store::Store;

use super::orders::AppState;
use crate::error::ApiError;

/// POST /jobs/{name}/run: run one pass of a background job now and return
/// its report.
#[tracing::instrument(skip(state))]
pub async fn run<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state
        .jobs
        .get(name.as_str())
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Job {name} not found")))?;

    let report = job.run().await?;
    tracing::info!(job = job.name(), %report, "Job run on demand");
    Ok(Json(report))
}
