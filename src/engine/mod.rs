pub mod http;
pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::Deserialize;
use thiserror::Error;

use crate::{errors::GenerationError, models::GenerationRequest};

pub type ChunkStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

/// The upstream prompt engine. One call opens one streaming exchange; the
/// returned stream ends when the engine closes the connection.
#[async_trait]
pub trait PromptEngine: Send + Sync {
    fn name(&self) -> &str;
    async fn open_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, UpstreamError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCode {
    Timeout,
    Network,
    Other,
}

/// Error payload the engine returns alongside a failing status. Both fields
/// are optional upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpstreamErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl UpstreamErrorBody {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Raw failure captured at the engine boundary, before translation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct UpstreamError {
    pub http_status: Option<u16>,
    pub transport: Option<TransportCode>,
    pub body: Option<UpstreamErrorBody>,
    pub message: String,
}

impl UpstreamError {
    pub fn status(status: u16, raw_body: &str) -> Self {
        let trimmed = raw_body.chars().take(400).collect::<String>();
        Self {
            http_status: Some(status),
            transport: None,
            body: UpstreamErrorBody::parse(raw_body),
            message: trimmed,
        }
    }

    pub fn transport(code: TransportCode, message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            transport: Some(code),
            body: None,
            message: message.into(),
        }
    }

    fn body_field(&self, pick: fn(&UpstreamErrorBody) -> Option<&String>) -> Option<String> {
        self.body
            .as_ref()
            .and_then(pick)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    }

    fn detail(&self, default_message: &str, default_code: &str) -> (String, String) {
        let message = self
            .body_field(|body| body.error.as_ref())
            .unwrap_or_else(|| default_message.to_owned());
        let code = self
            .body_field(|body| body.code.as_ref())
            .unwrap_or_else(|| default_code.to_owned());
        (message, code)
    }
}

impl From<UpstreamError> for GenerationError {
    fn from(error: UpstreamError) -> Self {
        match (error.http_status, error.transport) {
            (Some(400), _) => {
                let (message, code) = error.detail("Invalid request", "BAD_REQUEST");
                GenerationError::Validation { message, code }
            }
            (Some(500), _) => {
                let (message, code) = error.detail("Internal server error", "INTERNAL_ERROR");
                GenerationError::UpstreamFault { message, code }
            }
            (Some(status), _) => {
                let message = error
                    .body_field(|body| body.error.as_ref())
                    .unwrap_or_else(|| error.message.clone());
                GenerationError::Network(format!("Prompt Engine ERROR: ({status}): {message}"))
            }
            (None, Some(TransportCode::Timeout)) => GenerationError::Timeout,
            (None, Some(TransportCode::Network)) => GenerationError::Network(format!(
                "Prompt Engine ERROR: (Network): {}",
                error.message
            )),
            (None, _) => GenerationError::Unknown(format!(
                "Unexpected error during prompt generation: {}",
                error.message
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_uses_upstream_detail() {
        let error =
            UpstreamError::status(400, r#"{"error":"bad platform","code":"INVALID_PLATFORM"}"#);
        assert_eq!(
            GenerationError::from(error),
            GenerationError::Validation {
                message: "bad platform".to_owned(),
                code: "INVALID_PLATFORM".to_owned(),
            }
        );
    }

    #[test]
    fn bad_request_without_body_uses_defaults() {
        let error = UpstreamError::status(400, "not json");
        assert_eq!(
            GenerationError::from(error),
            GenerationError::Validation {
                message: "Invalid request".to_owned(),
                code: "BAD_REQUEST".to_owned(),
            }
        );
    }

    #[test]
    fn server_error_keeps_upstream_message_but_defaults_code() {
        let error = UpstreamError::status(500, r#"{"success":false,"error":"pipeline exploded"}"#);
        assert_eq!(
            GenerationError::from(error),
            GenerationError::UpstreamFault {
                message: "pipeline exploded".to_owned(),
                code: "INTERNAL_ERROR".to_owned(),
            }
        );

        let error = UpstreamError::status(500, "");
        assert_eq!(
            GenerationError::from(error),
            GenerationError::UpstreamFault {
                message: "Internal server error".to_owned(),
                code: "INTERNAL_ERROR".to_owned(),
            }
        );
    }

    #[test]
    fn other_statuses_are_network_errors_with_raw_status() {
        let error = GenerationError::from(UpstreamError::status(503, "overloaded"));
        assert_eq!(error.code(), "NETWORK_ERROR");
        assert_eq!(error.to_string(), "Prompt Engine ERROR: (503): overloaded");
    }

    #[test]
    fn transport_codes_translate() {
        let timeout = UpstreamError::transport(TransportCode::Timeout, "deadline");
        assert_eq!(GenerationError::from(timeout), GenerationError::Timeout);

        let refused = UpstreamError::transport(TransportCode::Network, "connection refused");
        let error = GenerationError::from(refused);
        assert_eq!(error.code(), "NETWORK_ERROR");
        assert!(error.to_string().contains("connection refused"));

        let other = UpstreamError::transport(TransportCode::Other, "bad builder");
        assert_eq!(GenerationError::from(other).code(), "UNKNOWN_ERROR");
    }
}
