use std::{env, net::SocketAddr, time::Duration};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base address of the prompt engine. `None` fails every generation with
    /// a configuration error instead of guessing a default.
    pub engine_url: Option<String>,
    pub timeout: Duration,
    pub bind_addr: SocketAddr,
    pub event_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            engine_url: None,
            timeout: DEFAULT_TIMEOUT,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let engine_url = env::var("PROMPT_ENGINE_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_owned())
            .filter(|value| !value.is_empty());
        let timeout = env::var("PROMPT_ENGINE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        let bind_addr = env::var("GATEWAY_BIND_ADDR")
            .ok()
            .and_then(|value| value.parse::<SocketAddr>().ok())
            .unwrap_or(defaults.bind_addr);
        let event_buffer = env::var("GATEWAY_EVENT_BUFFER")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(defaults.event_buffer);

        Self {
            engine_url,
            timeout,
            bind_addr,
            event_buffer,
        }
    }

    pub fn with_engine_url(mut self, url: impl Into<String>) -> Self {
        self.engine_url = Some(url.into().trim_end_matches('/').to_owned());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
