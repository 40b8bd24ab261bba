use crate::error::MergeError;
use crate::services::session::SessionError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(_) => AppError::NotFound(e.to_string()),
            SessionError::Busy(_) => AppError::Conflict(e.to_string()),
            SessionError::Io(io) => AppError::Merge(MergeError::Io(io)),
        }
    }
}

fn merge_status(e: &MergeError) -> StatusCode {
    match e {
        MergeError::Unreadable { .. }
        | MergeError::Encrypted { .. }
        | MergeError::InvalidOptions(_)
        | MergeError::NothingToMerge
        | MergeError::EmptyOutput => StatusCode::BAD_REQUEST,
        MergeError::Blocked { .. } => StatusCode::CONFLICT,
        MergeError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        MergeError::RemoteUpload(_) => StatusCode::BAD_GATEWAY,
        MergeError::Io(_) | MergeError::Pdf(_) | MergeError::Task(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Merge(e) => {
                let status = merge_status(&e);
                if status.is_server_error() {
                    tracing::error!("Merge error: {:?}", e);
                }
                let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    "Internal Server Error".to_string()
                } else {
                    e.to_string()
                };
                (status, message)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
