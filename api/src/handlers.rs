//! Top-level handlers (health, metrics, fallback) and the path parsing
//! shared by the resource/asset/operation handler modules.

pub mod assets;
pub mod operations;
pub mod resources;

use axum::extract::State;
use axum::http::StatusCode;
use castellum::metrics::gather_metrics;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn healthcheck() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> String {
    gather_metrics(&state.registry)
}

pub async fn route_not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "no such endpoint\n")
}

pub fn parse_scope(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("invalid project id: {raw}")))
}
