//! Classification of the engine's text stream.
//!
//! The engine speaks an unframed, line-oriented protocol. Each raw chunk is
//! matched by substring containment against two kinds of markers: progress
//! phrases, which are surfaced live and never kept, and the `===` region
//! marker, after which every other chunk is prompt content. Matching is per
//! chunk, so a marker split across two reads is not recognised.

use serde::Serialize;

use crate::{
    errors::GenerationError,
    models::{GenerationRequest, GenerationResult},
};

pub const PROGRESS_PHRASES: [&str; 5] = [
    "Analyzing context",
    "Extracting intent",
    "Generating base prompt",
    "Enhancing prompt",
    "Refining prompt",
];

pub const REGION_MARKER: &str = "===";
pub const BANNER_PHRASE: &str = "Enhanced Prompt for";

/// What a live observer sees, in arrival order. A session ends with exactly
/// one `Final` or one `Failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParserEvent {
    Progress { message: String },
    Content { text: String },
    Final { result: GenerationResult },
    Failure { error: String, code: String },
}

impl ParserEvent {
    pub fn failure(error: &GenerationError) -> Self {
        Self::Failure {
            error: error.to_string(),
            code: error.code().to_owned(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Content { .. } => "content",
            Self::Final { .. } => "result",
            Self::Failure { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Failure { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preamble,
    ContentRegion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Progress,
    RegionMarker,
    Banner,
    Content,
    Preamble,
}

#[derive(Debug, Clone)]
pub struct IncrementalParser {
    request: GenerationRequest,
    accumulated: String,
    phase: Phase,
}

impl IncrementalParser {
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            request,
            accumulated: String::new(),
            phase: Phase::Preamble,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn in_content_region(&self) -> bool {
        self.phase == Phase::ContentRegion
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    fn classify(&self, chunk: &str) -> Classification {
        // Order is load-bearing: a progress chunk that also carries the
        // marker is still only progress.
        if PROGRESS_PHRASES.iter().any(|phrase| chunk.contains(phrase)) {
            Classification::Progress
        } else if chunk.contains(REGION_MARKER) {
            Classification::RegionMarker
        } else if chunk.contains(BANNER_PHRASE) {
            Classification::Banner
        } else if self.in_content_region() {
            Classification::Content
        } else {
            Classification::Preamble
        }
    }

    /// Classifies one raw chunk. Returns the event to surface, if any.
    pub fn feed(&mut self, chunk: &str) -> Option<ParserEvent> {
        match self.classify(chunk) {
            Classification::Progress => Some(ParserEvent::Progress {
                message: chunk.trim().to_owned(),
            }),
            Classification::RegionMarker => {
                self.phase = Phase::ContentRegion;
                None
            }
            Classification::Banner | Classification::Preamble => None,
            Classification::Content => {
                self.accumulated.push_str(chunk);
                Some(ParserEvent::Content {
                    text: chunk.to_owned(),
                })
            }
        }
    }

    /// Ends the session after a clean close. An empty prompt is still a
    /// success.
    pub fn finalize(self) -> GenerationResult {
        GenerationResult::success(&self.request, self.accumulated)
    }
}

/// Reassembles UTF-8 sequences that straddle chunk boundaries. Bytes that
/// can never form valid UTF-8 are replaced lossily.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut text = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();

        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                }
                Err(error) => {
                    let (valid, tail) = rest.split_at(error.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match error.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[invalid..];
                        }
                        // Truncated sequence at the tail: keep it for the next chunk.
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        text
    }

    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}
