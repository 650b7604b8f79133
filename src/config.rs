//! Recognised configuration options. Loading this from disk and
//! wiring it to a CLI flag is out of scope; this module only
//! owns the shape and the documented defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketConfig {
    #[serde(default = "WebsocketConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "WebsocketConfig::default_max_connections_per_network")]
    pub max_connections_per_network: usize,
    #[serde(default = "WebsocketConfig::default_max_subscriptions_per_connection")]
    pub max_subscriptions_per_connection: usize,
    #[serde(default = "WebsocketConfig::default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "WebsocketConfig::default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
    #[serde(default = "WebsocketConfig::default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "WebsocketConfig::default_write_buffer_size")]
    pub write_buffer_size: usize,
}

impl WebsocketConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_max_connections_per_network() -> usize {
        10_000
    }
    fn default_max_subscriptions_per_connection() -> usize {
        100
    }
    fn default_ping_interval_secs() -> u64 {
        30
    }
    fn default_pong_timeout_secs() -> u64 {
        60
    }
    fn default_read_buffer_size() -> usize {
        4096
    }
    fn default_write_buffer_size() -> usize {
        4096
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_connections_per_network: Self::default_max_connections_per_network(),
            max_subscriptions_per_connection: Self::default_max_subscriptions_per_connection(),
            ping_interval_secs: Self::default_ping_interval_secs(),
            pong_timeout_secs: Self::default_pong_timeout_secs(),
            read_buffer_size: Self::default_read_buffer_size(),
            write_buffer_size: Self::default_write_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    #[serde(default = "SubscriptionConfig::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "SubscriptionConfig::default_max_log_filters")]
    pub max_log_filters: usize,
}

impl SubscriptionConfig {
    fn default_poll_interval_secs() -> u64 {
        2
    }
    fn default_max_log_filters() -> usize {
        50
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: Self::default_poll_interval_secs(),
            max_log_filters: Self::default_max_log_filters(),
        }
    }
}

/// Top-level recognised options for this crate, loaded by the embedder
/// (typically as one section of a larger gateway TOML config).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub websocket: WebsocketConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    /// Whether non-subscribe JSON-RPC methods are proxied over the stream.
    /// Defaults to `true`; embedders can flip this off per deployment.
    #[serde(default = "GatewayConfig::default_proxy_other_methods")]
    pub proxy_other_methods: bool,
}

impl GatewayConfig {
    fn default_proxy_other_methods() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = GatewayConfig::default();
        assert!(cfg.websocket.enabled);
        assert_eq!(cfg.websocket.max_connections_per_network, 10_000);
        assert_eq!(cfg.websocket.max_subscriptions_per_connection, 100);
        assert_eq!(cfg.websocket.ping_interval(), Duration::from_secs(30));
        assert_eq!(cfg.websocket.pong_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.websocket.read_buffer_size, 4096);
        assert_eq!(cfg.websocket.write_buffer_size, 4096);
        assert_eq!(cfg.subscription.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.subscription.max_log_filters, 50);
        assert!(cfg.proxy_other_methods);
    }

    #[test]
    fn parses_from_toml_with_partial_overrides() {
        let toml_str = r#"
            [websocket]
            maxConnectionsPerNetwork = 5

            [subscription]
            pollIntervalSecs = 10
        "#;
        let cfg: GatewayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.websocket.max_connections_per_network, 5);
        assert_eq!(cfg.websocket.max_subscriptions_per_connection, 100);
        assert_eq!(cfg.subscription.poll_interval_secs, 10);
    }
}
