use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub const TIMEOUT_MESSAGE: &str = "Request timed out. Please try again.";

/// Every failure a caller can observe. Upstream payloads and transport
/// errors are folded into one of these variants at the relay boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("{message}")]
    Validation { message: String, code: String },
    #[error("{0}")]
    Config(String),
    #[error("{message}")]
    UpstreamFault { message: String, code: String },
    #[error("{}", TIMEOUT_MESSAGE)]
    Timeout,
    #[error("{0}")]
    Network(String),
    #[error("{0}")]
    Unknown(String),
    /// The caller went away mid-stream. Never rendered, there is nobody to
    /// render it to.
    #[error("generation cancelled by caller")]
    Cancelled,
}

impl GenerationError {
    pub fn missing_fields() -> Self {
        Self::Validation {
            message: "Both input and platform are required".to_owned(),
            code: "MISSING_FIELDS".to_owned(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Validation { code, .. } => code,
            Self::Config(_) => "CONFIG_ERROR",
            Self::UpstreamFault { code, .. } => code,
            Self::Timeout => "TIMEOUT",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Unknown(_) => "UNKNOWN_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Config(_) => "config",
            Self::UpstreamFault { .. } => "upstream_fault",
            Self::Timeout => "timeout",
            Self::Network(_) => "network",
            Self::Unknown(_) => "unknown",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a caller may reasonably resubmit the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamFault { .. } | Self::Timeout | Self::Network(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamFault { .. } | Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            // 499 is the conventional "client closed request" code.
            Self::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    error: String,
    code: &'a str,
}

impl IntoResponse for GenerationError {
    fn into_response(self) -> Response {
        let payload = ErrorEnvelope {
            success: false,
            error: self.to_string(),
            code: self.code(),
        };

        (self.status(), Json(payload)).into_response()
    }
}
