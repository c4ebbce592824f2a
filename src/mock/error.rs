use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use crate::error::FieldError;

/// Errors returned by mock handlers, rendered in the backend's error body
/// shape: `{"detail": ...}` plus `errors` for field validation.
#[derive(Debug, Error)]
pub enum MockError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("Admin access required")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid input")]
    Validation(Vec<FieldError>),
}

impl MockError {
    pub fn field(field: &str, message: &str) -> Self {
        MockError::Validation(vec![FieldError::new(field, message)])
    }
}

impl IntoResponse for MockError {
    fn into_response(self) -> Response {
        let detail = self.to_string();
        match self {
            MockError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, Json(json!({ "detail": detail }))),
            MockError::Forbidden => (StatusCode::FORBIDDEN, Json(json!({ "detail": detail }))),
            MockError::NotFound(_) => (StatusCode::NOT_FOUND, Json(json!({ "detail": detail }))),
            MockError::BadRequest(_) => (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))),
            MockError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": detail, "errors": errors })),
            ),
        }
        .into_response()
    }
}
