//! Manual triggers for the expiration sweeps. Both are safe to call at any
//! time: the deadline sweep applies at most once per day and the extension
//! sweep only touches requests past their allowance.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;

use super::{parse_kind, Actor, AppState};
use crate::services::expiration::SweepOutcome;
use crate::{ApiResponse, ApiResult};

/// POST /api/v1/sweeps/:kind/deadlines
pub async fn sweep_deadlines(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    actor: Actor,
) -> ApiResult<SweepOutcome> {
    let kind = parse_kind(&kind)?;
    tracing::info!(kind = %kind, actor = actor.as_str(), "Manual deadline sweep");
    let outcome = state
        .services
        .expiration
        .sweep_deadlines(kind, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// POST /api/v1/sweeps/:kind/extensions
pub async fn sweep_extensions(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    actor: Actor,
) -> ApiResult<SweepOutcome> {
    let kind = parse_kind(&kind)?;
    tracing::info!(kind = %kind, actor = actor.as_str(), "Manual extension sweep");
    let outcome = state
        .services
        .expiration
        .sweep_extensions(kind, Utc::now())
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}
