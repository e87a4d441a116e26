use std::{convert::Infallible, io, time::Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    errors::GenerationError,
    models::{GenerateBody, GenerationRequest, GenerationResult},
    parser::ParserEvent,
    relay::RelayOutcome,
    session::GenerationSession,
    state::AppState,
};

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "upstream_configured": state.relay.is_configured(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => GenerationError::Unknown(format!("metrics render failed: {error}"))
            .into_response(),
    }
}

/// Runs a generation to completion and answers with the final result.
pub async fn generate(State(state): State<AppState>, Json(body): Json<GenerateBody>) -> Response {
    let started = Instant::now();
    let _inflight = state.metrics.inflight_guard();

    let (input, platform) = (body.input.clone(), body.platform.clone());
    let outcome = match accept(&state, body) {
        Ok(request) => {
            let report = GenerationSession::new(state.relay.clone(), request).run().await;
            state.metrics.observe_relay(&report.summary);
            report.outcome.inspect_err(|error| state.metrics.observe_failure(error))
        }
        Err(error) => Err(error),
    };

    let response = match outcome {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => (
            error.status(),
            Json(GenerationResult::failure(input, platform, &error)),
        )
            .into_response(),
    };

    state.metrics.observe_request(
        "/prompt/generate",
        "POST",
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

/// Re-emits the engine's bytes verbatim as they arrive.
pub async fn stream(State(state): State<AppState>, Json(body): Json<GenerateBody>) -> Response {
    let started = Instant::now();
    let response = match process_stream(state.clone(), body).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    };

    state.metrics.observe_request(
        "/prompt/stream",
        "POST",
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

async fn process_stream(state: AppState, body: GenerateBody) -> Result<Response, GenerationError> {
    let request = accept(&state, body)?;
    let (tx, mut rx) = mpsc::channel::<Bytes>(state.config.event_buffer);

    let relay = state.relay.clone();
    let mut relay_task = tokio::spawn(async move {
        let mut sink = tx;
        relay.relay(&request, &mut sink).await
    });

    // Hold the response until the first chunk so that failures to open the
    // upstream still get a proper status code.
    let first = match rx.recv().await {
        Some(chunk) => chunk,
        None => {
            let outcome = (&mut relay_task).await.map_err(|error| {
                GenerationError::Unknown(format!("relay task failed: {error}"))
            })?;
            return match outcome {
                RelayOutcome::Completed(summary) => {
                    state.metrics.observe_relay(&summary);
                    Ok(plain_text(Body::empty()))
                }
                RelayOutcome::Failed(error) => {
                    state.metrics.observe_failure(&error);
                    Err(error)
                }
                RelayOutcome::Cancelled(_) => Err(GenerationError::Cancelled),
            };
        }
    };

    let metrics = state.metrics.clone();
    let body = async_stream::stream! {
        yield Ok::<Bytes, io::Error>(first);
        while let Some(chunk) = rx.recv().await {
            yield Ok(chunk);
        }

        match relay_task.await {
            Ok(RelayOutcome::Completed(summary)) => metrics.observe_relay(&summary),
            Ok(RelayOutcome::Failed(error)) => {
                metrics.observe_failure(&error);
                warn!(code = error.code(), error = %error, "pass-through stream aborted");
                yield Err(io::Error::other(error.to_string()));
            }
            Ok(RelayOutcome::Cancelled(summary)) => metrics.observe_relay(&summary),
            Err(error) => {
                yield Err(io::Error::other(format!("relay task failed: {error}")));
            }
        }
    };

    Ok(plain_text(Body::from_stream(body)))
}

/// Streams classified parser events as server-sent events.
pub async fn events(State(state): State<AppState>, Json(body): Json<GenerateBody>) -> Response {
    let started = Instant::now();
    let response = match accept(&state, body) {
        Ok(request) => stream_events(state.clone(), request),
        Err(error) => error.into_response(),
    };

    state.metrics.observe_request(
        "/prompt/events",
        "POST",
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

fn stream_events(state: AppState, request: GenerationRequest) -> Response {
    let (tx, mut rx) = mpsc::channel::<ParserEvent>(state.config.event_buffer);
    let session = GenerationSession::new(state.relay.clone(), request).with_events(tx);
    let session_id = session.id();

    let metrics = state.metrics.clone();
    tokio::spawn(async move {
        let report = session.run().await;
        metrics.observe_relay(&report.summary);
        if let Err(error) = &report.outcome {
            metrics.observe_failure(error);
        }
    });

    let metrics = state.metrics.clone();
    let outbound = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            metrics.observe_event(event.kind());
            let terminal = event.is_terminal();
            yield Ok::<Event, Infallible>(json_event(&event));
            if terminal {
                break;
            }
        }
        info!(session_id = %session_id, "event stream closed");
    };

    Sse::new(outbound)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(10)))
        .into_response()
}

/// Validates the body and rejects up front when no engine is configured.
fn accept(state: &AppState, body: GenerateBody) -> Result<GenerationRequest, GenerationError> {
    let request = body.into_request().inspect_err(|error| {
        state.metrics.observe_failure(error);
    })?;
    state.relay.engine().inspect_err(|error| {
        state.metrics.observe_failure(error);
        warn!(error = %error, "generation rejected: engine not configured");
    })?;

    info!(
        platform = %request.platform(),
        input_chars = request.input().chars().count(),
        "generation request accepted"
    );
    Ok(request)
}

fn plain_text(body: Body) -> Response {
    ([(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

fn json_event(event: &ParserEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(serialized) => Event::default().event(event.kind()).data(serialized),
        Err(error) => {
            let fallback = json!({
                "type": "failure",
                "error": format!("serialization error: {error}"),
                "code": "UNKNOWN_ERROR",
            });
            Event::default().event("error").data(fallback.to_string())
        }
    }
}
