use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tracing::info;

use super::{Actor, AppState};
use crate::errors::ServiceError;
use crate::repositories::RequestWithDetails;
use crate::services::lifecycle::LifecycleEvent;
use crate::services::requests::CreateRequestInput;
use crate::{ApiResponse, ApiResult};

/// POST /api/v1/requests
pub async fn create_request(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<CreateRequestInput>,
) -> Result<(StatusCode, Json<ApiResponse<RequestWithDetails>>), ServiceError> {
    let created = state
        .services
        .requests
        .create_request(input, actor.as_str(), Utc::now())
        .await?;

    info!(request_id = %created.request.id, actor = actor.as_str(), "Request created via API");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// GET /api/v1/requests/:id
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RequestWithDetails> {
    let record = state.services.lifecycle.get_request(&id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// POST /api/v1/requests/:id/transitions
///
/// Body is a tagged lifecycle event, e.g. `{"event":"cancel","reason":"supplier late"}`.
/// Scheduler-only events are refused here.
pub async fn apply_transition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    actor: Actor,
    Json(event): Json<LifecycleEvent>,
) -> ApiResult<RequestWithDetails> {
    if event.is_system() {
        return Err(ServiceError::BadRequest(format!(
            "{} can only be raised by the scheduler",
            event.name()
        )));
    }

    let record = state
        .services
        .lifecycle
        .apply_transition(&id, event, actor.as_str(), Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

/// POST /api/v1/requests/:id/assign
///
/// Lets the assignment engine pick counting staff for a NOT_STARTED request.
pub async fn assign_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    actor: Actor,
) -> ApiResult<RequestWithDetails> {
    let record = state
        .services
        .lifecycle
        .assign(&id, actor.as_str(), Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(record)))
}
