use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use fiscalflow_infra::{QueryStatus, ResultStatus};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// HTTP status of an event or proof rebuild result.
pub fn result_status(status: ResultStatus) -> StatusCode {
    match status {
        s if s.is_success() => StatusCode::OK,
        ResultStatus::ValidationError | ResultStatus::BuildError => StatusCode::BAD_REQUEST,
        ResultStatus::TechnicalError => StatusCode::BAD_GATEWAY,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

/// HTTP status of a query result. An unavailable service is still an answer.
pub fn query_status(status: QueryStatus) -> StatusCode {
    match status {
        QueryStatus::TechnicalError => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_statuses() {
        assert_eq!(result_status(ResultStatus::Duplicate), StatusCode::OK);
        assert_eq!(result_status(ResultStatus::RegisteredUnlinked), StatusCode::OK);
        assert_eq!(result_status(ResultStatus::ValidationError), StatusCode::BAD_REQUEST);
        assert_eq!(result_status(ResultStatus::Rejected), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(result_status(ResultStatus::TechnicalError), StatusCode::BAD_GATEWAY);
        assert_eq!(result_status(ResultStatus::Authorized), StatusCode::OK);
        assert_eq!(result_status(ResultStatus::Denied), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn query_statuses() {
        assert_eq!(query_status(QueryStatus::Unavailable), StatusCode::OK);
        assert_eq!(query_status(QueryStatus::TechnicalError), StatusCode::BAD_GATEWAY);
    }
}
