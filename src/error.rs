//! 统一的 API 错误类型与转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    PayloadTooLarge(String),
    InsufficientStorage(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg).into_response(),
            ApiError::InsufficientStorage(msg) => {
                (StatusCode::INSUFFICIENT_STORAGE, msg).into_response()
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        if error.is_not_found() {
            return ApiError::NotFound("not found".into());
        }
        match error {
            StorageError::InvalidName | StorageError::InvalidPath | StorageError::Stream(_) => {
                ApiError::BadRequest(error.to_string())
            }
            StorageError::FileTooLarge => ApiError::PayloadTooLarge(error.to_string()),
            StorageError::QuotaExceeded => ApiError::InsufficientStorage(error.to_string()),
            StorageError::Io(err) => ApiError::Internal(err.to_string()),
        }
    }
}
