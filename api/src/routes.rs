use axum::routing::{get, post};
use axum::Router;

use crate::{handlers, state::AppState};

pub fn resource_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/projects/:project_id/resources/:asset_type",
            get(handlers::resources::get_resource)
                .put(handlers::resources::put_resource)
                .delete(handlers::resources::delete_resource),
        )
        .route(
            "/v1/projects/:project_id/resources/:asset_type/assets",
            get(handlers::assets::list_assets),
        )
        .route(
            "/v1/projects/:project_id/resources/:asset_type/assets/:asset_id",
            get(handlers::assets::get_asset),
        )
        .route(
            "/v1/projects/:project_id/resources/:asset_type/operations/pending",
            get(handlers::operations::list_pending),
        )
        .route(
            "/v1/projects/:project_id/resources/:asset_type/operations/recently-finished",
            get(handlers::operations::list_recently_finished),
        )
        .route(
            "/v1/projects/:project_id/resources/:asset_type/assets/:asset_id/greenlight",
            post(handlers::operations::greenlight),
        )
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/healthcheck", get(handlers::healthcheck))
        .route("/metrics", get(handlers::metrics))
}
