use crate::services::ServiceError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Error returned by every handler: an HTTP status plus a message that is
/// rendered as `{"error": .., "status": ..}`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.message,
            "status": self.status.as_u16(),
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::UploadNotFound(_)
            | ServiceError::ObjectNotFound(_)
            | ServiceError::BucketNotFound(_)
            | ServiceError::TaskNotFound(_)
            | ServiceError::AccountNotFound(_)
            | ServiceError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::WrongOffset { .. } => StatusCode::CONFLICT,
            ServiceError::UploadBig | ServiceError::ResourceTooBig { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::UploadNotActive { .. } => StatusCode::GONE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", err);
        }
        AppError::new(status, err.to_string())
    }
}
