use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

use fiscalflow_core::id::only_digits;
use fiscalflow_core::DocumentKey;
use fiscalflow_events::EventRequest;
use fiscalflow_infra::DanfeError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/emitir", post(emit))
        .route("/cancelar", post(cancel))
        .route("/cce", post(correct))
        .route("/inutilizar", post(void_range))
        .route("/consultar/:chave", get(query_key))
        .route("/status", get(service_status))
        .route("/danfe/:chave", get(danfe))
        .route("/reprocessar/:chave", post(rebuild_proof))
}

/// Run work that talks to the authority on its own task, so a client that
/// disconnects mid-request does not cancel a transmission in flight.
async fn detached<T: Send + 'static>(work: impl Future<Output = T> + Send + 'static) -> Result<T, Response> {
    tokio::spawn(work).await.map_err(|e| {
        tracing::error!(error = %e, "request task aborted");
        errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "request task aborted")
    })
}

fn parse_key(chave: &str) -> Result<DocumentKey, Response> {
    only_digits(chave)
        .parse()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_key", format!("{e}")))
}

/// Emit one document or a batch. 200 when at least one item was authorized,
/// 422 otherwise.
pub async fn emit(Extension(services): Extension<Arc<AppServices>>, body: Bytes) -> axum::response::Response {
    if body.iter().all(u8::is_ascii_whitespace) {
        return errors::json_error(StatusCode::BAD_REQUEST, "empty_body", "request body is empty");
    }
    let body: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_json", e.to_string()),
    };
    let documents = match dto::documents_from_body(body) {
        Ok(d) => d,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", msg),
    };

    let batch = services.pipelines.batch.clone();
    let report = match detached(async move { batch.submit_batch(documents).await }).await {
        Ok(report) => report,
        Err(response) => return response,
    };
    let status = if report.any_authorized() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(report)).into_response()
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CancelRequest>, JsonRejection>,
) -> axum::response::Response {
    match body {
        Ok(Json(body)) => submit_event(services, body.into()).await,
        Err(e) => errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()),
    }
}

pub async fn correct(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CorrectionRequest>, JsonRejection>,
) -> axum::response::Response {
    match body {
        Ok(Json(body)) => submit_event(services, body.into()).await,
        Err(e) => errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()),
    }
}

pub async fn void_range(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::VoidanceRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()),
    };
    match EventRequest::try_from(body) {
        Ok(request) => submit_event(services, request).await,
        Err(msg) => errors::json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
    }
}

async fn submit_event(services: Arc<AppServices>, request: EventRequest) -> axum::response::Response {
    let events = services.pipelines.events.clone();
    match detached(async move { events.submit_event(&request).await }).await {
        Ok(result) => (errors::result_status(result.status), Json(result)).into_response(),
        Err(response) => response,
    }
}

pub async fn query_key(
    Extension(services): Extension<Arc<AppServices>>,
    Path(chave): Path<String>,
) -> axum::response::Response {
    let key = match parse_key(&chave) {
        Ok(k) => k,
        Err(response) => return response,
    };
    let result = services.pipelines.queries.query_key(&key).await;
    (errors::query_status(result.status), Json(result)).into_response()
}

pub async fn service_status(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::StatusParams>,
) -> axum::response::Response {
    let result = services.pipelines.queries.service_status(params.uf.as_deref()).await;
    (errors::query_status(result.status), Json(result)).into_response()
}

/// DANFE PDF of an authorized document, rendered on demand when it was not
/// kept at emission.
pub async fn danfe(
    Extension(services): Extension<Arc<AppServices>>,
    Path(chave): Path<String>,
) -> axum::response::Response {
    let key = match parse_key(&chave) {
        Ok(k) => k,
        Err(response) => return response,
    };
    match services.pipelines.documents.danfe(&key).await {
        Ok(pdf) => (
            [
                (header::CONTENT_TYPE, "application/pdf".to_string()),
                (header::CONTENT_DISPOSITION, format!("inline; filename=\"DANFE-{key}.pdf\"")),
            ],
            pdf,
        )
            .into_response(),
        Err(e @ DanfeError::NoProof(_)) => errors::json_error(StatusCode::NOT_FOUND, "not_found", e.to_string()),
        Err(e @ DanfeError::Render(_)) => errors::json_error(StatusCode::BAD_GATEWAY, "render_failed", e.to_string()),
        Err(e @ DanfeError::Store(_)) => {
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
        }
    }
}

/// Store the proof of a document the authority already decided, from the
/// artifacts kept by its earlier submission.
pub async fn rebuild_proof(
    Extension(services): Extension<Arc<AppServices>>,
    Path(chave): Path<String>,
) -> axum::response::Response {
    let key = match parse_key(&chave) {
        Ok(k) => k,
        Err(response) => return response,
    };
    let documents = services.pipelines.documents.clone();
    match detached(async move { documents.rebuild_proof(&key).await }).await {
        Ok(result) => (errors::result_status(result.status), Json(result)).into_response(),
        Err(response) => response,
    }
}
