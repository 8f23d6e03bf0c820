//! Caller identity supplied by the upstream identity component.
//!
//! Authentication happens in front of this service; requests arrive with the
//! numeric caller id in a header. Missing or malformed ids are rejected with
//! 401 before any handler logic runs.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::errors::AppError;

pub const ADMIN_ID_HEADER: &str = "x-admin-id";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Id of the administrator issuing or listing claim tokens.
#[derive(Debug, Clone, Copy)]
pub struct AdminId(pub i64);

/// Id of the authenticated shop owner.
#[derive(Debug, Clone, Copy)]
pub struct OwnerId(pub i64);

fn header_id(parts: &Parts, name: &str) -> Result<i64, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            tracing::debug!(header = name, "missing or malformed caller id");
            AppError::Unauthorized
        })
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AdminId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_id(parts, ADMIN_ID_HEADER).map(AdminId)
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for OwnerId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_id(parts, USER_ID_HEADER).map(OwnerId)
    }
}
