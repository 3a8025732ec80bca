use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::TranslateError;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Translation(#[from] TranslateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn translation_error_parts(err: TranslateError) -> (StatusCode, ErrorDetail) {
    let message = err.to_string();
    match err {
        TranslateError::EmptyQuery => (
            StatusCode::BAD_REQUEST,
            ErrorDetail::new("VALIDATION_ERROR", message),
        ),
        TranslateError::UnknownMetric { best_score } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorDetail::new(
                "UNKNOWN_METRIC",
                format!("{} Rephrase the question with a metric name or alias from the catalog.", message),
            )
            .with_details(json!({ "best_score": best_score })),
        ),
        TranslateError::AmbiguousMetric { candidates } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorDetail::new(
                "AMBIGUOUS_METRIC",
                format!("{} Name one of them or add a tag value to narrow it down.", message),
            )
            .with_details(json!({ "candidates": candidates })),
        ),
        TranslateError::SchemaUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorDetail::new("SCHEMA_UNAVAILABLE", message),
        ),
        TranslateError::MaxAttemptsExceeded { attempts, last, session } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorDetail::new("MAX_ATTEMPTS_EXCEEDED", message).with_details(json!({
                "attempts": attempts,
                "last_error": last,
                "session": session,
            })),
        ),
        TranslateError::Catalog(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetail::new("CATALOG_ERROR", message),
        ),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            AppError::Translation(err) => translation_error_parts(err),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
