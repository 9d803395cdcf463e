//! Asset observation endpoints: listing a resource's assets and inspecting
//! one asset together with its operation history.

use axum::extract::{Path, State};
use axum::Json;
use castellum::db::{assets, operations, resources};
use castellum::models::Resource;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::handlers::parse_scope;
use crate::models::{AssetView, FinishedOperationView, PendingOperationView};
use crate::state::AppState;

const FINISHED_OPERATIONS_LIMIT: i64 = 128;

#[derive(Serialize)]
pub struct AssetListResponse {
    pub assets: Vec<AssetView>,
}

#[derive(Serialize)]
pub struct AssetDetailResponse {
    #[serde(flatten)]
    pub asset: AssetView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_operation: Option<PendingOperationView>,
    pub finished_operations: Vec<FinishedOperationView>,
}

async fn load_resource(state: &AppState, project_id: &str, asset_type: &str) -> ApiResult<Resource> {
    let scope_uuid = parse_scope(project_id)?;
    resources::find_by_scope_and_type(&state.db, scope_uuid, asset_type)
        .await?
        .ok_or_else(|| ApiError::not_found("no such resource"))
}

pub async fn list_assets(
    State(state): State<AppState>,
    Path((project_id, asset_type)): Path<(String, String)>,
) -> ApiResult<Json<AssetListResponse>> {
    let resource = load_resource(&state, &project_id, &asset_type).await?;
    let rows = assets::list_for_resource(&state.db, resource.id).await?;
    Ok(Json(AssetListResponse {
        assets: rows.iter().map(AssetView::from).collect(),
    }))
}

pub async fn get_asset(
    State(state): State<AppState>,
    Path((project_id, asset_type, asset_id)): Path<(String, String, Uuid)>,
) -> ApiResult<Json<AssetDetailResponse>> {
    let resource = load_resource(&state, &project_id, &asset_type).await?;
    let asset = assets::find_by_id(&state.db, asset_id)
        .await?
        .filter(|a| a.resource_id == resource.id)
        .ok_or_else(|| ApiError::not_found("no such asset"))?;

    let pending = operations::get_pending(&state.db, asset.id).await?;
    let finished = operations::list_finished_for_asset(&state.db, asset.id, FINISHED_OPERATIONS_LIMIT).await?;

    Ok(Json(AssetDetailResponse {
        asset: AssetView::from(&asset),
        pending_operation: pending.as_ref().map(PendingOperationView::from),
        finished_operations: finished.iter().map(FinishedOperationView::from).collect(),
    }))
}
