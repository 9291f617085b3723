use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, warn};

use crate::{
    models::{CreateStorageConfig, StorageConfig, StorageTestResult, TestStorageConfig, UpdateStorageConfig},
    routes::storage_error_status,
    storage::factory::{test_storage_config, validate_storage_config, AdapterOptions},
    AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_storages).post(create_storage))
        .route("/test", post(test_storage))
        .route("/works", get(list_works))
        .route("/{id}", get(get_storage).put(update_storage).delete(delete_storage))
}

fn adapter_options(state: &AppState) -> AdapterOptions {
    AdapterOptions {
        webdav_timeout: state.config.webdav_timeout(),
    }
}

#[utoipa::path(
    get,
    path = "/api/storages",
    tag = "storages",
    responses(
        (status = 200, description = "Configured storages, highest priority first", body = Vec<StorageConfig>),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_storages(State(state): State<Arc<AppState>>) -> Result<Json<Vec<StorageConfig>>, StatusCode> {
    state.db.get_storage_configs().await.map(Json).map_err(|e| {
        error!("Failed to list storages: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[utoipa::path(
    get,
    path = "/api/storages/{id}",
    tag = "storages",
    params(("id" = i64, Path, description = "Storage ID")),
    responses(
        (status = 200, description = "Storage configuration", body = StorageConfig),
        (status = 404, description = "Storage not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_storage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<StorageConfig>, StatusCode> {
    match state.db.get_storage_config(id).await {
        Ok(Some(storage)) => Ok(Json(storage)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to get storage {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/storages",
    tag = "storages",
    request_body = CreateStorageConfig,
    responses(
        (status = 201, description = "Storage created", body = StorageConfig),
        (status = 400, description = "Unknown type or malformed config"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_storage(
    State(state): State<Arc<AppState>>,
    Json(storage): Json<CreateStorageConfig>,
) -> Result<(StatusCode, Json<StorageConfig>), StatusCode> {
    if let Err(e) = validate_storage_config(&storage.storage_type, &storage.config) {
        warn!("Rejected storage '{}': {}", storage.name, e);
        return Err(StatusCode::BAD_REQUEST);
    }

    let created = state.db.create_storage_config(&storage).await.map_err(|e| {
        error!("Failed to create storage '{}': {}", storage.name, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    state.storage.invalidate_cache();
    info!("Created storage {} '{}' ({})", created.id, created.name, created.storage_type);
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/api/storages/{id}",
    tag = "storages",
    params(("id" = i64, Path, description = "Storage ID")),
    request_body = UpdateStorageConfig,
    responses(
        (status = 200, description = "Storage updated", body = StorageConfig),
        (status = 400, description = "Unknown type or malformed config"),
        (status = 404, description = "Storage not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn update_storage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(update): Json<UpdateStorageConfig>,
) -> Result<Json<StorageConfig>, StatusCode> {
    let existing = match state.db.get_storage_config(id).await {
        Ok(Some(existing)) => existing,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to get storage {}: {}", id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // Type and config are validated together since either may change alone
    let storage_type = update.storage_type.as_deref().unwrap_or(&existing.storage_type);
    let config = update.config.as_ref().unwrap_or(&existing.config);
    if let Err(e) = validate_storage_config(storage_type, config) {
        warn!("Rejected update of storage {}: {}", id, e);
        return Err(StatusCode::BAD_REQUEST);
    }

    let updated = match state.db.update_storage_config(id, &update).await {
        Ok(Some(updated)) => updated,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to update storage {}: {}", id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    state.storage.invalidate_cache();
    info!("Updated storage {} '{}'", updated.id, updated.name);
    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/storages/{id}",
    tag = "storages",
    params(("id" = i64, Path, description = "Storage ID")),
    responses(
        (status = 204, description = "Storage deleted"),
        (status = 404, description = "Storage not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn delete_storage(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> StatusCode {
    match state.db.delete_storage_config(id).await {
        Ok(true) => {
            state.storage.invalidate_cache();
            info!("Deleted storage {}", id);
            StatusCode::NO_CONTENT
        }
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => {
            error!("Failed to delete storage {}: {}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Probe a proposed backend before saving it
#[utoipa::path(
    post,
    path = "/api/storages/test",
    tag = "storages",
    request_body = TestStorageConfig,
    responses(
        (status = 200, description = "Probe result", body = StorageTestResult)
    )
)]
pub async fn test_storage(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TestStorageConfig>,
) -> Json<StorageTestResult> {
    let result = match test_storage_config(&request.storage_type, &request.config, &adapter_options(&state)).await {
        Ok(true) => StorageTestResult {
            success: true,
            message: format!("{} storage is reachable", request.storage_type),
        },
        Ok(false) => StorageTestResult {
            success: false,
            message: format!("{} storage failed its connectivity check", request.storage_type),
        },
        Err(e) => StorageTestResult {
            success: false,
            message: e.to_string(),
        },
    };

    info!("Storage test for {}: {}", request.storage_type, result.message);
    Json(result)
}

/// Work ids that exist on at least one configured storage
#[utoipa::path(
    get,
    path = "/api/storages/works",
    tag = "storages",
    responses(
        (status = 200, description = "Sorted work ids", body = Vec<String>),
        (status = 500, description = "A storage is unavailable"),
        (status = 502, description = "A storage returned an invalid response")
    )
)]
pub async fn list_works(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    match state.storage.list().await {
        Ok(works) => Ok(Json(works.into_iter().collect())),
        Err(e) => {
            error!("Failed to list works across storages: {}", e);
            Err((storage_error_status(&e), e.to_string()))
        }
    }
}
