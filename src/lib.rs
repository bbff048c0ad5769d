//! Warehouse operations service
//!
//! Request lifecycle for imports, exports and stock checks, the sweeps that
//! auto-cancel overdue work, sequential request identifiers, recurring stock
//! checks and counting-staff assignment.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod repositories;
pub mod scheduler;
pub mod services;

use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::ServiceContainer;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: ServiceContainer,
    pub event_sender: Option<events::EventSender>,
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/requests", post(handlers::requests::create_request))
        .route("/requests/:id", get(handlers::requests::get_request))
        .route(
            "/requests/:id/transitions",
            post(handlers::requests::apply_transition),
        )
        .route(
            "/requests/:id/assign",
            post(handlers::requests::assign_request),
        )
        .route(
            "/sweeps/:kind/deadlines",
            post(handlers::sweeps::sweep_deadlines),
        )
        .route(
            "/sweeps/:kind/extensions",
            post(handlers::sweeps::sweep_extensions),
        )
        .route(
            "/stock-checks/next-recurrence",
            get(handlers::recurrence::next_recurrence),
        )
}

/// Full application router: health probe plus the v1 API with HTTP tracing.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
