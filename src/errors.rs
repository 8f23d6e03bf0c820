use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Boundary error taxonomy.
///
/// `InvalidOrExpiredToken` deliberately collapses every token rejection cause
/// (bad signature, unknown record, hash mismatch, either expiry check) so the
/// API cannot be used as an oracle for valid correlation ids. The finer cause
/// is only ever written to the server log.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("token has already been used")]
    AlreadyUsedToken,

    #[error("token issuance failed: {0}")]
    Issuance(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("search query failed: {0}")]
    SearchQuery(#[source] StoreError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidOrExpiredToken | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::AlreadyUsedToken => StatusCode::CONFLICT,
            AppError::Issuance(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Persistence(_) | AppError::SearchQuery(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, code, msg) = match &self {
            AppError::Validation(reason) => (
                "invalid_request_error",
                "validation_failed",
                reason.clone(),
            ),
            AppError::InvalidOrExpiredToken => (
                "authentication_error",
                "invalid_or_expired_token",
                "invalid or expired token".to_string(),
            ),
            AppError::AlreadyUsedToken => (
                "conflict_error",
                "token_already_used",
                "token has already been used".to_string(),
            ),
            AppError::Issuance(e) => {
                tracing::error!("Token issuance error: {}", e);
                (
                    "internal_error",
                    "issuance_failed",
                    "failed to issue token".to_string(),
                )
            }
            AppError::Persistence(e) => {
                tracing::error!("Persistence error: {}", e);
                (
                    "internal_error",
                    "persistence_unavailable",
                    "storage temporarily unavailable, retry later".to_string(),
                )
            }
            AppError::SearchQuery(e) => {
                tracing::error!("Search query error: {}", e);
                (
                    "internal_error",
                    "search_unavailable",
                    "search temporarily unavailable, retry later".to_string(),
                )
            }
            AppError::NotFound(what) => ("not_found_error", "not_found", format!("{} not found", what)),
            AppError::Forbidden(reason) => ("permission_error", "forbidden", reason.clone()),
            AppError::Unauthorized => (
                "authentication_error",
                "unauthenticated",
                "missing or invalid caller identity".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        // Infrastructure failures are safe to retry.
        if matches!(self, AppError::Persistence(_) | AppError::SearchQuery(_)) {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("1"));
        }

        response
    }
}
