use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    config::{GatewayConfig, DEFAULT_TIMEOUT},
    engine::{http::HttpEngine, PromptEngine},
    errors::GenerationError,
    models::GenerationRequest,
};

/// Returned by a sink whose consumer has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Downstream end of a relay. `accept` is awaited before the next upstream
/// read, so a slow sink slows the engine down with it.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn accept(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;

    /// Resolves once the consumer is gone. Used to abandon a stalled upstream
    /// without waiting for its next chunk.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

#[async_trait]
impl ChunkSink for mpsc::Sender<Bytes> {
    async fn accept(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.send(chunk).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        mpsc::Sender::closed(self).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    pub chunks: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed(RelaySummary),
    Failed(GenerationError),
    /// The sink went away before the engine finished.
    Cancelled(RelaySummary),
}

impl RelayOutcome {
    pub fn into_result(self) -> Result<RelaySummary, GenerationError> {
        match self {
            Self::Completed(summary) => Ok(summary),
            Self::Failed(error) => Err(error),
            Self::Cancelled(_) => Err(GenerationError::Cancelled),
        }
    }
}

#[derive(Clone)]
pub struct Relay {
    engine: Option<Arc<dyn PromptEngine>>,
    timeout: Duration,
}

impl Relay {
    pub fn new(engine: Arc<dyn PromptEngine>, timeout: Duration) -> Self {
        Self {
            engine: Some(engine),
            timeout,
        }
    }

    /// A relay with no engine behind it. Every call fails with a
    /// configuration error.
    pub fn unconfigured() -> Self {
        Self {
            engine: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, GenerationError> {
        match &config.engine_url {
            Some(url) => {
                let engine = HttpEngine::new(url.clone(), config.timeout)?;
                Ok(Self::new(Arc::new(engine), config.timeout))
            }
            None => Ok(Self {
                engine: None,
                timeout: config.timeout,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_configured(&self) -> bool {
        self.engine.is_some()
    }

    pub fn engine(&self) -> Result<&Arc<dyn PromptEngine>, GenerationError> {
        self.engine.as_ref().ok_or_else(|| {
            GenerationError::Config("PROMPT_ENGINE_URL environment variable is not set".to_owned())
        })
    }

    /// Streams one generation from the engine into `sink`, chunk by chunk.
    /// The whole exchange, connect included, shares a single deadline.
    pub async fn relay<S>(&self, request: &GenerationRequest, sink: &mut S) -> RelayOutcome
    where
        S: ChunkSink + ?Sized,
    {
        let engine = match self.engine() {
            Ok(engine) => engine,
            Err(error) => return RelayOutcome::Failed(error),
        };

        let started = Instant::now();
        let forwarding = forward(engine.as_ref(), request, sink);
        let outcome = match tokio::time::timeout(self.timeout, forwarding).await {
            Ok(outcome) => outcome,
            Err(_) => RelayOutcome::Failed(GenerationError::Timeout),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            RelayOutcome::Completed(summary) => debug!(
                engine = engine.name(),
                chunks = summary.chunks,
                bytes = summary.bytes,
                elapsed_ms,
                "relay completed"
            ),
            RelayOutcome::Failed(error) => warn!(
                engine = engine.name(),
                code = error.code(),
                error = %error,
                elapsed_ms,
                "relay failed"
            ),
            RelayOutcome::Cancelled(summary) => debug!(
                engine = engine.name(),
                chunks = summary.chunks,
                elapsed_ms,
                "relay cancelled by caller"
            ),
        }

        outcome
    }
}

async fn forward<S>(
    engine: &dyn PromptEngine,
    request: &GenerationRequest,
    sink: &mut S,
) -> RelayOutcome
where
    S: ChunkSink + ?Sized,
{
    let mut summary = RelaySummary::default();
    let upstream = tokio::select! {
        opened = engine.open_stream(request) => opened,
        _ = sink.closed() => return RelayOutcome::Cancelled(summary),
    };
    let mut upstream = match upstream {
        Ok(stream) => stream,
        Err(error) => return RelayOutcome::Failed(error.into()),
    };

    loop {
        let next = tokio::select! {
            next = upstream.next() => next,
            _ = sink.closed() => return RelayOutcome::Cancelled(summary),
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(error)) => return RelayOutcome::Failed(error.into()),
            None => return RelayOutcome::Completed(summary),
        };
        if chunk.is_empty() {
            continue;
        }

        summary.chunks += 1;
        summary.bytes += chunk.len();
        if sink.accept(chunk).await.is_err() {
            return RelayOutcome::Cancelled(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        mock::{ScriptStep, ScriptedEngine},
        TransportCode, UpstreamError,
    };

    fn request() -> GenerationRequest {
        GenerationRequest::new("launch announcement", "LinkedIn").expect("valid request")
    }

    #[tokio::test]
    async fn forwards_chunks_verbatim_and_in_order() {
        let engine = Arc::new(ScriptedEngine::from_chunks(["one ", "two ", "three"]));
        let relay = Relay::new(engine, DEFAULT_TIMEOUT);
        let (mut tx, mut rx) = mpsc::channel::<Bytes>(8);

        let outcome = relay.relay(&request(), &mut tx).await;
        drop(tx);

        assert_eq!(
            outcome,
            RelayOutcome::Completed(RelaySummary {
                chunks: 3,
                bytes: 13
            })
        );
        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.push(chunk);
        }
        assert_eq!(
            received,
            vec![Bytes::from("one "), Bytes::from("two "), Bytes::from("three")]
        );
    }

    #[tokio::test]
    async fn unconfigured_relay_fails_closed() {
        let relay = Relay::unconfigured();
        let (mut tx, _rx) = mpsc::channel::<Bytes>(1);

        let error = relay
            .relay(&request(), &mut tx)
            .await
            .into_result()
            .expect_err("relay without engine should fail");

        assert_eq!(error.code(), "CONFIG_ERROR");
        assert!(!error.is_retryable());
    }

    #[test]
    fn from_config_without_url_is_unconfigured() {
        let relay = Relay::from_config(&GatewayConfig::default()).expect("relay should build");
        assert!(!relay.is_configured());
        assert_eq!(relay.timeout(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_engine_times_out_after_budget() {
        let engine = ScriptedEngine::new(vec![
            ScriptStep::Chunk(Bytes::from("Analyzing context...")),
            ScriptStep::Stall,
        ]);
        let relay = Relay::new(Arc::new(engine.clone()), DEFAULT_TIMEOUT);
        let (mut tx, mut rx) = mpsc::channel::<Bytes>(8);

        let started = tokio::time::Instant::now();
        let outcome = relay.relay(&request(), &mut tx).await;

        assert_eq!(outcome, RelayOutcome::Failed(GenerationError::Timeout));
        assert!(started.elapsed() >= DEFAULT_TIMEOUT);
        assert_eq!(rx.recv().await, Some(Bytes::from("Analyzing context...")));
    }

    #[tokio::test]
    async fn mid_stream_failure_is_translated() {
        let engine = ScriptedEngine::new(vec![
            ScriptStep::Chunk(Bytes::from("partial")),
            ScriptStep::Fail(UpstreamError::transport(TransportCode::Network, "connection reset")),
        ]);
        let relay = Relay::new(Arc::new(engine), DEFAULT_TIMEOUT);
        let (mut tx, _rx) = mpsc::channel::<Bytes>(8);

        let error = relay
            .relay(&request(), &mut tx)
            .await
            .into_result()
            .expect_err("reset should fail the relay");

        assert_eq!(error.code(), "NETWORK_ERROR");
        assert!(error.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn rejected_open_is_translated() {
        let engine = ScriptedEngine::rejecting(UpstreamError::status(
            400,
            r#"{"error":"bad platform","code":"INVALID_PLATFORM"}"#,
        ));
        let relay = Relay::new(Arc::new(engine), DEFAULT_TIMEOUT);
        let (mut tx, _rx) = mpsc::channel::<Bytes>(1);

        let outcome = relay.relay(&request(), &mut tx).await;

        assert_eq!(
            outcome,
            RelayOutcome::Failed(GenerationError::Validation {
                message: "bad platform".to_owned(),
                code: "INVALID_PLATFORM".to_owned(),
            })
        );
    }

    #[tokio::test]
    async fn dropped_sink_abandons_stalled_upstream() {
        let engine = ScriptedEngine::new(vec![ScriptStep::Stall]);
        let relay = Relay::new(Arc::new(engine.clone()), DEFAULT_TIMEOUT);
        let (tx, rx) = mpsc::channel::<Bytes>(1);

        let task = tokio::spawn({
            let relay = relay.clone();
            async move {
                let mut tx = tx;
                relay.relay(&request(), &mut tx).await
            }
        });
        while engine.opened() == 0 {
            tokio::task::yield_now().await;
        }
        drop(rx);

        let outcome = task.await.expect("relay task should finish");
        assert_eq!(outcome, RelayOutcome::Cancelled(RelaySummary::default()));

        // The playback task notices its reader is gone on its next poll.
        for _ in 0..10 {
            if engine.abandoned() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(engine.abandoned());
    }
}
