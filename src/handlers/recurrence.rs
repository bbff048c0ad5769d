use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::{ApiResponse, ApiResult};

#[derive(Debug, Serialize)]
pub struct NextRecurrence {
    pub next_run: DateTime<Utc>,
    /// `next_run` rendered in the operating timezone
    pub local: String,
    pub timezone: String,
}

/// GET /api/v1/stock-checks/next-recurrence
pub async fn next_recurrence(State(state): State<AppState>) -> ApiResult<NextRecurrence> {
    let scheduler = &state.services.recurrence;
    let next_run = scheduler.compute_next_recurrence(Utc::now()).await?;
    let tz = scheduler.timezone();

    Ok(Json(ApiResponse::success(NextRecurrence {
        next_run,
        local: next_run.with_timezone(&tz).to_rfc3339(),
        timezone: tz.name().to_string(),
    })))
}
