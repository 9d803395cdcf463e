//! Resource configuration endpoints: GET/PUT/DELETE per
//! `(project, asset_type)` pair.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use castellum::db::resources;
use castellum::{metrics, ManagerError};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::handlers::parse_scope;
use crate::models::{ResourceSpec, ResourceView};
use crate::state::AppState;

pub async fn get_resource(
    State(state): State<AppState>,
    Path((project_id, asset_type)): Path<(String, String)>,
) -> ApiResult<Json<ResourceView>> {
    let scope_uuid = parse_scope(&project_id)?;
    let resource = resources::find_by_scope_and_type(&state.db, scope_uuid, &asset_type)
        .await?
        .ok_or_else(|| ApiError::not_found("no such resource"))?;
    Ok(Json(ResourceView::from(&resource)))
}

pub async fn put_resource(
    State(state): State<AppState>,
    Path((project_id, asset_type)): Path<(String, String)>,
    Json(spec): Json<ResourceSpec>,
) -> ApiResult<StatusCode> {
    let scope_uuid = parse_scope(&project_id)?;

    let Some(manager) = state.managers.get(&asset_type) else {
        return Err(ApiError::not_found(format!("no such asset type: {asset_type}")));
    };

    // The plugin gets to refuse the opaque config blob before anything is
    // stored; it sees the scope's other resources so it can refuse
    // conflicting combinations too.
    let scope_resources = resources::list_for_scope(&state.db, scope_uuid).await?;
    let config_arg = spec.config.as_ref().filter(|c| !castellum::is_blank_config(Some(*c)));
    if let Err(err) = manager.check_resource_allowed(&asset_type, scope_uuid, config_arg, &scope_resources) {
        let message = match err {
            ManagerError::NoConfigurationAllowed => "no configuration allowed for this asset type".to_string(),
            ManagerError::NoConfigurationProvided => "this asset type requires a configuration".to_string(),
            ManagerError::Other(message) => message,
        };
        return Err(ApiError::unprocessable(message));
    }

    let existing = scope_resources.iter().find(|r| r.asset_type == asset_type).cloned();
    if existing.as_ref().is_some_and(|r| r.seeded) {
        return Err(ApiError::conflict("resource is managed by a project seed"));
    }

    let id = existing.as_ref().map(|r| r.id).unwrap_or_else(Uuid::new_v4);
    let resource = spec
        .into_resource(id, scope_uuid, asset_type.clone())
        .map_err(ApiError::bad_request)?;

    let ceiling = state
        .file_config
        .max_asset_size(&asset_type, scope_uuid)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    resource
        .validate(ceiling)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    if existing.is_some() {
        resources::update_config(&state.db, &resource).await?;
    } else {
        resources::create(&state.db, &resource).await?;
        metrics::initialize_resource_series(&scope_uuid.to_string(), &asset_type);
    }
    Ok(StatusCode::ACCEPTED)
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Path((project_id, asset_type)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let scope_uuid = parse_scope(&project_id)?;
    let resource = resources::find_by_scope_and_type(&state.db, scope_uuid, &asset_type)
        .await?
        .ok_or_else(|| ApiError::not_found("no such resource"))?;

    if !resources::delete_if_not_seeded(&state.db, resource.id).await? {
        return Err(ApiError::conflict("resource is managed by a project seed"));
    }
    metrics::clear_resource_series(&scope_uuid.to_string(), &asset_type);
    Ok(StatusCode::NO_CONTENT)
}
