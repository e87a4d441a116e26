use std::sync::Arc;

use crate::{config::GatewayConfig, engine::PromptEngine, metrics::AppMetrics, relay::Relay};

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub config: Arc<GatewayConfig>,
    pub metrics: Arc<AppMetrics>,
}

impl AppState {
    pub fn new(relay: Relay, config: GatewayConfig) -> Self {
        Self {
            relay,
            config: Arc::new(config),
            metrics: Arc::new(AppMetrics::new()),
        }
    }

    pub fn new_for_tests<E>(engine: Arc<E>) -> Self
    where
        E: PromptEngine + 'static,
    {
        let config = GatewayConfig::default();
        let relay = Relay::new(engine, config.timeout);
        Self::new(relay, config)
    }

    pub fn unconfigured_for_tests() -> Self {
        Self::new(Relay::unconfigured(), GatewayConfig::default())
    }
}
