use crate::services::coordinator::MediaError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Error returned by every handler, rendered as `{"error", "status"}`.
///
/// Client errors carry their message as is. Server errors keep the full
/// cause in the log and hand the client a generic message, so store paths
/// and database details stay on the server.
#[derive(Debug)]
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

    /// Unknown entity kind, entity or stored file.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    fn internal(detail: &dyn fmt::Display, public: &str) -> Self {
        tracing::error!("{}: {}", public, detail);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, public)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        let status = err.status();
        if !status.is_server_error() {
            return AppError::new(status, err.to_string());
        }
        match &err {
            MediaError::Inconsistent { .. } => {
                AppError::internal(&err, "media stored but the record was not updated")
            }
            MediaError::Repository(_) => AppError::internal(&err, "media record unavailable"),
            _ => AppError::internal(&err, "media storage failure"),
        }
    }
}
