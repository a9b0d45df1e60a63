//! Sub-area artifact endpoint.

use crate::coalesce::QueryStatus;
use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, Query, State};
use std::collections::HashMap;
use subarea_core::EntityId;

/// GET /api/v1/subareas/{id}[?rewind]
///
/// `data` is the static URL of the combined artifact once it exists, and
/// `null` while a build is pending. The mere presence of `rewind` selects the
/// rewound artifact.
pub async fn get_subareas(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<ApiResponse<Option<String>>>> {
    // Undecodable segments (e.g. invalid UTF-8) are invalid ids too
    let Path(id) = id.map_err(|_| ApiError::InvalidId)?;
    let id: EntityId = id.parse().map_err(|_| ApiError::InvalidId)?;
    let rewind = params.contains_key("rewind");

    let response = match state.coalescer.query(id, rewind).await? {
        QueryStatus::Ready(key) => ApiResponse::new(
            "",
            Some(format!("{}/{}", state.static_root(), key.file_name())),
        ),
        QueryStatus::Building => ApiResponse::new("check back later", None),
        QueryStatus::Enqueued => {
            tracing::info!(id = %id, rewind, "build enqueued");
            ApiResponse::new("enqueued. check back later", None)
        }
    };
    Ok(Json(response))
}
