use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use leasehold_core::lock_pick::ExpiryCounts;
use leasehold_core::types::{Resource, TypeCode, TypeFilter};
use leasehold_core::{LockError, StoreError};

// ─── Error Codes ────────────────────────────────────────────────────────────

pub const LOCK_COLLISION: &str = "LOCK_COLLISION";
pub const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";
pub const INVALID_TTL: &str = "INVALID_TTL";
pub const INVALID_OWNER: &str = "INVALID_OWNER";
pub const INVALID_TYPE: &str = "INVALID_TYPE";
pub const STORE_ERROR: &str = "STORE_ERROR";

pub fn error_code(err: &LockError) -> &'static str {
    match err {
        LockError::LockCollision => LOCK_COLLISION,
        LockError::ResourceNotFound => RESOURCE_NOT_FOUND,
        LockError::InvalidTtl => INVALID_TTL,
        LockError::InvalidOwner => INVALID_OWNER,
        LockError::InvalidType => INVALID_TYPE,
        LockError::Store(_) | LockError::Transport(_) => STORE_ERROR,
    }
}

pub fn status_for(err: &LockError) -> StatusCode {
    match err {
        LockError::InvalidTtl | LockError::InvalidOwner | LockError::InvalidType => {
            StatusCode::BAD_REQUEST
        }
        LockError::ResourceNotFound => StatusCode::NOT_FOUND,
        LockError::LockCollision => StatusCode::CONFLICT,
        LockError::Store(_) | LockError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Inverse of [`error_code`], used by the HTTP client. Unknown codes become
/// transport errors carrying the server's message.
pub fn error_from_code(code: Option<&str>, message: Option<String>) -> LockError {
    let message = message.unwrap_or_default();
    match code {
        Some(LOCK_COLLISION) => LockError::LockCollision,
        Some(RESOURCE_NOT_FOUND) => LockError::ResourceNotFound,
        Some(INVALID_TTL) => LockError::InvalidTtl,
        Some(INVALID_OWNER) => LockError::InvalidOwner,
        Some(INVALID_TYPE) => LockError::InvalidType,
        Some(STORE_ERROR) => LockError::Store(StoreError::Backend(message)),
        _ => LockError::Transport(message),
    }
}

/// A [`LockError`] rendered as an HTTP response.
pub struct ApiError(pub LockError);

impl From<LockError> for ApiError {
    fn from(err: LockError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::err(error_code(&self.0), self.0.to_string());
        (status_for(&self.0), Json(body)).into_response()
    }
}

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct AcquireRequest {
    pub resource: Resource,
    pub ttl_in_seconds: i64,
}

#[derive(Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub resource: Resource,
}

/// Query string for list and count. `type_code` arrives as a raw integer so
/// an out-of-range value surfaces as `INVALID_TYPE` rather than a parse error.
#[derive(Deserialize, Default)]
pub struct TypeQuery {
    #[serde(default, rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub type_code: i32,
}

impl TypeQuery {
    pub fn into_filter(self) -> Result<TypeFilter, LockError> {
        Ok(TypeFilter {
            resource_type: self.resource_type,
            type_code: TypeCode::try_from(self.type_code)?,
        })
    }
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            code: None,
            error: None,
        }
    }

    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            code: None,
            error: None,
        }
    }

    pub fn err(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            code: Some(code.into()),
            error: Some(msg.into()),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub held: usize,
    pub watchers: usize,
    pub expired: ExpiryCounts,
    pub version: String,
}
