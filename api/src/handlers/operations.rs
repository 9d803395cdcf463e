//! Operation endpoints: listing a resource's pending and recently finished
//! operations, and the user-driven greenlight.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use castellum::db::{assets, operations, resources};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::handlers::parse_scope;
use crate::models::{FinishedOperationView, PendingOperationView};
use crate::state::AppState;

const FINISHED_OPERATIONS_LIMIT: i64 = 128;

#[derive(Serialize)]
pub struct PendingOperationsResponse {
    pub pending_operations: Vec<PendingOperationView>,
}

#[derive(Serialize)]
pub struct FinishedOperationsResponse {
    pub finished_operations: Vec<FinishedOperationView>,
}

pub async fn list_pending(
    State(state): State<AppState>,
    Path((project_id, asset_type)): Path<(String, String)>,
) -> ApiResult<Json<PendingOperationsResponse>> {
    let scope_uuid = parse_scope(&project_id)?;
    let resource = resources::find_by_scope_and_type(&state.db, scope_uuid, &asset_type)
        .await?
        .ok_or_else(|| ApiError::not_found("no such resource"))?;
    let rows = operations::list_pending_for_resource(&state.db, resource.id).await?;
    Ok(Json(PendingOperationsResponse {
        pending_operations: rows.iter().map(PendingOperationView::from).collect(),
    }))
}

pub async fn list_recently_finished(
    State(state): State<AppState>,
    Path((project_id, asset_type)): Path<(String, String)>,
) -> ApiResult<Json<FinishedOperationsResponse>> {
    let scope_uuid = parse_scope(&project_id)?;
    let resource = resources::find_by_scope_and_type(&state.db, scope_uuid, &asset_type)
        .await?
        .ok_or_else(|| ApiError::not_found("no such resource"))?;
    let rows = operations::list_finished_for_resource(&state.db, resource.id, FINISHED_OPERATIONS_LIMIT).await?;
    Ok(Json(FinishedOperationsResponse {
        finished_operations: rows.iter().map(FinishedOperationView::from).collect(),
    }))
}

/// Approves a confirmed operation for execution. Authentication sits in
/// front of this API; the caller's identity arrives as an opaque header
/// value and is recorded verbatim on the operation.
pub async fn greenlight(
    State(state): State<AppState>,
    Path((project_id, asset_type, asset_id)): Path<(String, String, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let scope_uuid = parse_scope(&project_id)?;
    let resource = resources::find_by_scope_and_type(&state.db, scope_uuid, &asset_type)
        .await?
        .ok_or_else(|| ApiError::not_found("no such resource"))?;
    let asset = assets::find_by_id(&state.db, asset_id)
        .await?
        .filter(|a| a.resource_id == resource.id)
        .ok_or_else(|| ApiError::not_found("no such asset"))?;

    let user_id = headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let op = operations::get_pending(&state.db, asset.id)
        .await?
        .ok_or_else(|| ApiError::not_found("no pending operation for this asset"))?;
    if op.is_greenlit() {
        return Err(ApiError::conflict("operation is already greenlit"));
    }
    if !op.is_confirmed() {
        return Err(ApiError::conflict("operation is not yet confirmed"));
    }

    let updated = operations::greenlight(&state.db, asset.id, scope_uuid, &asset_type, user_id, Utc::now()).await?;
    if !updated {
        // The scraper moved the op between our read and the update.
        return Err(ApiError::conflict("operation changed state, try again"));
    }
    Ok(StatusCode::ACCEPTED)
}
