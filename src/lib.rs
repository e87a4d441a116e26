pub mod config;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod relay;
pub mod session;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use config::GatewayConfig;
use relay::Relay;
use tracing::{info, warn};

pub fn build_state(config: GatewayConfig) -> Result<state::AppState, std::io::Error> {
    let relay = Relay::from_config(&config).map_err(std::io::Error::other)?;
    match &config.engine_url {
        Some(url) => info!(
            engine_url = %url,
            timeout_secs = config.timeout.as_secs(),
            "prompt engine configured"
        ),
        None => warn!("PROMPT_ENGINE_URL is not set; generation requests will fail"),
    }
    Ok(state::AppState::new(relay, config))
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/status", get(handlers::status))
        .route("/metrics", get(handlers::metrics))
        .route("/prompt/generate", post(handlers::generate))
        .route("/prompt/stream", post(handlers::stream))
        .route("/prompt/events", post(handlers::events))
        .with_state(state)
}
