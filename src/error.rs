//! Error handling for armwatch

use crate::models::Arm;
use crate::motor_bus::BusError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Arm has no open bus handle
    #[error("Arm {0} is not connected")]
    ArmNotConnected(Arm),

    /// Motor bus failure
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Bytes offered as a frame are not a JPEG image
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// No free port to listen on
    #[error("No free port on {host} in {start}..={end}")]
    PortExhausted { host: String, start: u16, end: u16 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::ArmNotConnected(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ARM_NOT_CONNECTED",
                self.to_string(),
            ),
            Error::Bus(e) => (StatusCode::BAD_GATEWAY, "BUS_ERROR", e.to_string()),
            Error::InvalidFrame(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INVALID_FRAME",
                msg.clone(),
            ),
            Error::PortExhausted { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PORT_EXHAUSTED",
                self.to_string(),
            ),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
