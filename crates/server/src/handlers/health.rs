//! Liveness endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET / - plain-text greeting.
pub async fn root() -> &'static str {
    "Hello"
}

/// GET /api/v1/health - reports ok while the output directory is reachable.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.store().health_check().await.map_err(|e| {
        tracing::error!(error = %e, "output directory health check failed");
        ApiError::Internal(e.to_string())
    })?;

    Ok(Json(HealthResponse { status: "ok" }))
}
