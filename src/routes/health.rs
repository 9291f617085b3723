use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(health_check))
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is up")
    )
)]
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
