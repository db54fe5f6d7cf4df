use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::utils::SecurityError;

/// Reason carried by a 429 raised by the traffic monitor
pub const DDOS_DETECTED_REASON: &str = "Potential DDoS attack detected";
/// Reason carried by a 429 raised by an active auto-block
pub const DDOS_BLOCKED_REASON: &str = "IP blocked due to DDoS protection";

/// Errors surfaced to HTTP clients
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Client is on the blocklist
    #[error("Access forbidden: {reason}")]
    Blocked { reason: String },

    /// Current traffic from the client looks like an attack
    #[error("Too many requests: {}", DDOS_DETECTED_REASON)]
    DdosDetected,

    /// Client is under an active traffic-anomaly auto-block
    #[error("Too many requests: {}", DDOS_BLOCKED_REASON)]
    DdosBlocked,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON body of every error response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub message: &'static str,
    pub reason: String,
    pub timestamp: String,
}

impl ServiceError {
    /// HTTP status of the response
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Blocked { .. } => StatusCode::FORBIDDEN,
            ServiceError::DdosDetected | ServiceError::DdosBlocked => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Blocked { .. } => "blocked",
            ServiceError::DdosDetected => "ddos_detected",
            ServiceError::DdosBlocked => "ddos_blocked",
            ServiceError::Unauthorized => "unauthorized",
            ServiceError::InvalidRequest(_) => "invalid_request",
            ServiceError::Internal(_) => "internal",
        }
    }

    /// JSON body, stamped with the current time
    pub fn body(&self) -> ErrorBody {
        let (message, reason) = match self {
            ServiceError::Blocked { reason } => ("Access forbidden", reason.clone()),
            ServiceError::DdosDetected => ("Too many requests", DDOS_DETECTED_REASON.to_string()),
            ServiceError::DdosBlocked => ("Too many requests", DDOS_BLOCKED_REASON.to_string()),
            ServiceError::Unauthorized => ("Unauthorized", "Missing or invalid API key".to_string()),
            ServiceError::InvalidRequest(msg) => ("Bad request", msg.clone()),
            ServiceError::Internal(_) => ("Internal server error", "Internal server error".to_string()),
        };

        ErrorBody {
            status_code: self.status().as_u16(),
            message,
            reason,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if let ServiceError::Internal(msg) = &self {
            tracing::error!(error = %msg, "Internal error");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<SecurityError> for ServiceError {
    fn from(error: SecurityError) -> Self {
        match error {
            SecurityError::InvalidRequest(msg) => ServiceError::InvalidRequest(msg),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}
