use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::{sync::mpsc, time::sleep};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::{
    engine::{ChunkStream, PromptEngine, UpstreamError},
    models::GenerationRequest,
};

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Chunk(Bytes),
    Delay(Duration),
    /// Hold the connection open without sending anything until the reader
    /// goes away.
    Stall,
    Fail(UpstreamError),
}

/// In-memory engine that plays back a fixed script. Each call to
/// `open_stream` replays the script from the start.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    name: String,
    steps: Arc<Vec<ScriptStep>>,
    reject_with: Option<UpstreamError>,
    opened: Arc<AtomicUsize>,
    abandoned: Arc<AtomicBool>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            name: "scripted-engine".to_owned(),
            steps: Arc::new(steps),
            reject_with: None,
            opened: Arc::new(AtomicUsize::new(0)),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            chunks
                .into_iter()
                .map(|chunk| ScriptStep::Chunk(Bytes::from(chunk.into())))
                .collect(),
        )
    }

    /// Fails every `open_stream` call before any chunk is produced.
    pub fn rejecting(error: UpstreamError) -> Self {
        Self {
            reject_with: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// True once a playback noticed that its reader had dropped the stream.
    pub fn abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PromptEngine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, UpstreamError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.reject_with {
            return Err(error.clone());
        }

        let steps = self.steps.clone();
        let abandoned = self.abandoned.clone();
        // Capacity 1 keeps playback in lockstep with the reader.
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            for step in steps.iter() {
                match step {
                    ScriptStep::Chunk(chunk) => {
                        if tx.send(Ok(chunk.clone())).await.is_err() {
                            abandoned.store(true, Ordering::SeqCst);
                            return;
                        }
                    }
                    ScriptStep::Delay(delay) => sleep(*delay).await,
                    ScriptStep::Stall => {
                        tx.closed().await;
                        abandoned.store(true, Ordering::SeqCst);
                        return;
                    }
                    ScriptStep::Fail(error) => {
                        let _ = tx.send(Err(error.clone())).await;
                        return;
                    }
                }
            }
        });

        debug!(
            engine = %self.name,
            platform = %request.platform(),
            "scripted stream prepared"
        );
        Ok(ReceiverStream::new(rx).boxed())
    }
}
