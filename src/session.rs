use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    errors::GenerationError,
    models::{GenerationRequest, GenerationResult},
    parser::{ChunkDecoder, IncrementalParser, ParserEvent},
    relay::{ChunkSink, Relay, RelaySummary, SinkClosed},
};

/// Sink that classifies chunks as they are relayed and pushes the resulting
/// events to an optional observer.
struct ParsingSink {
    parser: IncrementalParser,
    decoder: ChunkDecoder,
    events: Option<mpsc::Sender<ParserEvent>>,
    summary: RelaySummary,
    emitted: usize,
}

impl ParsingSink {
    fn new(request: GenerationRequest, events: Option<mpsc::Sender<ParserEvent>>) -> Self {
        Self {
            parser: IncrementalParser::new(request),
            decoder: ChunkDecoder::default(),
            events,
            summary: RelaySummary::default(),
            emitted: 0,
        }
    }

    async fn classify(&mut self, text: &str) -> Result<(), SinkClosed> {
        let Some(event) = self.parser.feed(text) else {
            return Ok(());
        };
        self.emitted += 1;
        match &self.events {
            Some(events) => events.send(event).await.map_err(|_| SinkClosed),
            None => Ok(()),
        }
    }

    async fn finish(mut self) -> Result<GenerationResult, SinkClosed> {
        if let Some(rest) = self.decoder.flush() {
            self.classify(&rest).await?;
        }
        Ok(self.parser.finalize())
    }
}

#[async_trait]
impl ChunkSink for ParsingSink {
    async fn accept(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.summary.chunks += 1;
        self.summary.bytes += chunk.len();
        let text = self.decoder.decode(&chunk);
        if text.is_empty() {
            return Ok(());
        }
        self.classify(&text).await
    }

    async fn closed(&self) {
        match &self.events {
            Some(events) => events.closed().await,
            None => std::future::pending::<()>().await,
        }
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub id: Uuid,
    pub summary: RelaySummary,
    /// Progress and content events produced before the terminal one.
    pub events: usize,
    pub outcome: Result<GenerationResult, GenerationError>,
}

/// One generation: relay plus parser, isolated from every other session.
pub struct GenerationSession {
    id: Uuid,
    relay: Relay,
    request: GenerationRequest,
    events: Option<mpsc::Sender<ParserEvent>>,
}

impl GenerationSession {
    pub fn new(relay: Relay, request: GenerationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            relay,
            request,
            events: None,
        }
    }

    /// Delivers live events to `events`. Delivery blocks when the channel is
    /// full, which in turn pauses the upstream read.
    pub fn with_events(mut self, events: mpsc::Sender<ParserEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn run(self) -> SessionReport {
        info!(
            session_id = %self.id,
            platform = %self.request.platform(),
            input_chars = self.request.input().chars().count(),
            "generation session started"
        );

        let deadline = Instant::now() + self.relay.timeout();
        let mut sink = ParsingSink::new(self.request.clone(), self.events.clone());
        let relayed = self.relay.relay(&self.request, &mut sink).await.into_result();
        let summary = sink.summary;
        let emitted = sink.emitted;

        let outcome = match relayed {
            Ok(_) => match time::timeout_at(deadline, sink.finish()).await {
                Ok(finished) => finished.map_err(|_| GenerationError::Cancelled),
                Err(_) => Err(GenerationError::Timeout),
            },
            Err(error) => Err(error),
        };

        if let Some(events) = &self.events {
            let terminal = match &outcome {
                Ok(result) => Some(ParserEvent::Final {
                    result: result.clone(),
                }),
                Err(GenerationError::Cancelled) => None,
                Err(error) => Some(ParserEvent::failure(error)),
            };
            // A full channel gets until the deadline; past it the event is dropped.
            if let Some(event) = terminal {
                if time::timeout_at(deadline, events.send(event)).await.is_err() {
                    warn!(session_id = %self.id, "observer stalled, terminal event dropped");
                }
            }
        }

        match &outcome {
            Ok(result) => info!(
                session_id = %self.id,
                chunks = summary.chunks,
                bytes = summary.bytes,
                prompt_chars = result.prompt.chars().count(),
                "generation session finished"
            ),
            Err(error) => debug!(
                session_id = %self.id,
                code = error.code(),
                chunks = summary.chunks,
                "generation session ended without result"
            ),
        }

        SessionReport {
            id: self.id,
            summary,
            events: emitted,
            outcome,
        }
    }
}
