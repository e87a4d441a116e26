use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tracing::debug;

use crate::{
    engine::{ChunkStream, PromptEngine, TransportCode, UpstreamError},
    errors::GenerationError,
    models::GenerationRequest,
};

/// Streams from a remote prompt engine over HTTP.
#[derive(Clone)]
pub struct HttpEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEngine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|error| {
                GenerationError::Config(format!(
                    "failed to build prompt engine HTTP client: {error}"
                ))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl PromptEngine for HttpEngine {
    fn name(&self) -> &str {
        "http-engine"
    }

    async fn open_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, UpstreamError> {
        let payload = json!({
            "input": request.input(),
            "platform": request.platform(),
        });

        let response = self
            .client
            .post(self.url("/generate"))
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(engine = self.name(), status = status.as_u16(), "engine rejected request");
            return Err(UpstreamError::status(status.as_u16(), &body));
        }

        debug!(engine = self.name(), "stream opened");
        Ok(response
            .bytes_stream()
            .map(|next| next.map_err(transport_error))
            .boxed())
    }
}

fn transport_error(error: reqwest::Error) -> UpstreamError {
    let code = if error.is_timeout() {
        TransportCode::Timeout
    } else if error.is_builder() || error.is_decode() {
        TransportCode::Other
    } else {
        TransportCode::Network
    };
    UpstreamError::transport(code, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slashes() {
        let engine = HttpEngine::new("http://engine:9000/", Duration::from_secs(1))
            .expect("client should build");
        assert_eq!(engine.url("/generate"), "http://engine:9000/generate");
        assert_eq!(engine.url("generate"), "http://engine:9000/generate");
    }
}
