use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::app::errors;

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "msg": "pong"}))
}

pub async fn not_found(uri: axum::http::Uri) -> axum::response::Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("no route for {}", uri.path()))
}
