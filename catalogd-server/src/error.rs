//! HTTP error mapping: wraps `catalogd_core::CatalogError` (and a few
//! handler-local cases) into the response shape and status code §7/§10.1
//! specify.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use catalogd_core::CatalogError;
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<CatalogError> for AppError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::Parse(message) => Self::bad_request(message),
            CatalogError::Auth => Self::unauthorized("unauthorized"),
            CatalogError::Storage(source) => {
                tracing::error!(error = %source, "storage error");
                Self::internal("internal error")
            }
            CatalogError::Registry(message) => {
                tracing::error!(error = %message, "registry error");
                Self::internal("internal error")
            }
            CatalogError::Http(source) => {
                tracing::error!(error = %source, "registry http error");
                Self::internal("internal error")
            }
            CatalogError::Io(source) => {
                tracing::error!(error = %source, "io error");
                Self::internal("internal error")
            }
            // A release of a non-pending repository or an `Exists` term on a
            // scalar group is a programmer error (§7): abort rather than
            // paper over it with a 500.
            CatalogError::Programmer(message) => {
                panic!("programmer error: {message}");
            }
        }
    }
}
