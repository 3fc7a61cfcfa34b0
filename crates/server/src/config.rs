//! Chat server configuration

use std::sync::Arc;

use natter_core::{CoreConfig, Hub, ParticipantScope};
use tracing::warn;

/// Configuration for the Natter Chat Server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Seconds between server-side heartbeat pings
    pub heartbeat_secs: u64,
    /// Seconds of peer silence before the connection is dropped
    pub ws_timeout_secs: u64,
    /// Outbound frame queue depth per connection
    pub outbound_capacity: usize,
    /// Delivery core tunables
    pub core: CoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            heartbeat_secs: 30,
            ws_timeout_secs: 60,
            outbound_capacity: 64,
            core: CoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build the config from `NATTER_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("NATTER_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse("NATTER_PORT") {
            config.port = port;
        }
        if let Some(secs) = env_parse("NATTER_HEARTBEAT_INTERVAL") {
            config.heartbeat_secs = secs;
        }
        if let Some(secs) = env_parse("NATTER_WS_TIMEOUT") {
            config.ws_timeout_secs = secs;
        }
        if let Some(depth) = env_parse("NATTER_QUEUE_CAPACITY") {
            config.outbound_capacity = depth;
        }
        if let Some(cap) = env_parse("NATTER_HISTORY_CAP") {
            config.core.history_cap = Some(cap);
        }
        if let Ok(scope) = std::env::var("NATTER_SCOPE") {
            match ParticipantScope::parse(&scope) {
                Some(parsed) => config.core.scope = parsed,
                None => warn!(
                    "Unrecognized NATTER_SCOPE {:?}, keeping {:?}",
                    scope, config.core.scope
                ),
            }
        }

        config
    }

    /// Address string for the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub config: ServerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.heartbeat_secs, 30);
        assert_eq!(config.ws_timeout_secs, 60);
        assert_eq!(config.outbound_capacity, 64);
        assert_eq!(config.core.scope, ParticipantScope::Global);
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("NATTER_HOST", "127.0.0.1");
        std::env::set_var("NATTER_PORT", "9100");
        std::env::set_var("NATTER_SCOPE", "per_chat");
        std::env::set_var("NATTER_HISTORY_CAP", "250");
        std::env::set_var("NATTER_WS_TIMEOUT", "not a number");

        let config = ServerConfig::from_env();
        assert_eq!(config.bind_addr(), "127.0.0.1:9100");
        assert_eq!(config.core.scope, ParticipantScope::PerChat);
        assert_eq!(config.core.history_cap, Some(250));
        // Unparseable values keep the default.
        assert_eq!(config.ws_timeout_secs, 60);

        std::env::remove_var("NATTER_HOST");
        std::env::remove_var("NATTER_PORT");
        std::env::remove_var("NATTER_SCOPE");
        std::env::remove_var("NATTER_HISTORY_CAP");
        std::env::remove_var("NATTER_WS_TIMEOUT");
    }
}
