use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::connection_manager::RegistryError;

/// Errors raised by the relay core (acceptor, drainer, overlay).
///
/// `Clone` because a listener-close result is awaited more than once through a
/// shared future.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Shutdown drain already started")]
    AlreadyDraining,

    #[error("Listener close failed: {0}")]
    ListenerClose(String),

    #[error("Overlay error: {0}")]
    Overlay(String),

    #[error("Drain timed out with {0} connection(s) still open")]
    DrainTimeout(usize),

    #[error("Relay is not open")]
    NotOpen,

    #[error("Relay is shutting down")]
    ShuttingDown,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] crate::telemetry::TelemetryError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Relay(RelayError::NotOpen)
            | AppError::Relay(RelayError::ShuttingDown)
            | AppError::Relay(RelayError::AlreadyDraining) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
            }
            AppError::Relay(_) => (StatusCode::INTERNAL_SERVER_ERROR, "RELAY_ERROR"),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            AppError::Telemetry(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TELEMETRY_ERROR"),
        };
        let message = self.to_string();

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
