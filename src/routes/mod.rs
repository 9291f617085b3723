use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

use crate::{storage::StorageError, AppState};

pub mod health;
pub mod media;
pub mod storages;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        media::serve_media,
        storages::list_storages,
        storages::get_storage,
        storages::create_storage,
        storages::update_storage,
        storages::delete_storage,
        storages::test_storage,
        storages::list_works,
    ),
    components(schemas(
        crate::models::StorageConfig,
        crate::models::CreateStorageConfig,
        crate::models::UpdateStorageConfig,
        crate::models::TestStorageConfig,
        crate::models::StorageTestResult,
    )),
    tags(
        (name = "media", description = "Media streaming and transcoding"),
        (name = "storages", description = "Storage backend configuration"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

/// HTTP status a storage failure surfaces as
pub fn storage_error_status(error: &StorageError) -> StatusCode {
    if error.is_not_found() {
        return StatusCode::NOT_FOUND;
    }
    match error {
        StorageError::AccessDenied(_) => StatusCode::BAD_REQUEST,
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::Protocol { .. } | StorageError::Http(_) => StatusCode::BAD_GATEWAY,
        StorageError::BackendUnhealthy { .. }
        | StorageError::InvalidConfig(_)
        | StorageError::Unsupported(_)
        | StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn storage_error_response(error: &StorageError) -> Response {
    (storage_error_status(error), error.to_string()).into_response()
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/health", health::router())
        .nest("/api/storages", storages::router())
        .nest("/media", media::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
