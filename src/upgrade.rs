//! Upgrade server: accepts the upgrade handshake at
//! `/{projectId}/{architecture}/{chainId}`, looks up or creates the
//! per-network connection manager, and performs the stream takeover.
//!
//! Manager creation is double-checked: an initial read-only lookup avoids
//! taking the write path on the (overwhelmingly common) hit case, and the
//! `DashMap` entry API collapses the create-if-missing race into one atomic
//! step, the same idiom `web3_proxy::app.rs` uses for its in-flight request
//! dedup map.

use crate::config::GatewayConfig;
use crate::connection_manager::ConnectionManager;
use crate::errors::{GatewayError, GatewayResult};
use crate::forward::{ForwardRpc, NetworkInfo};
use crate::types::NetworkKey;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Creates a `ForwardRpc`/`NetworkInfo` pair for a freshly seen network key.
/// Supplied by the embedder; upstream selection is out of scope for the
/// subscription core itself.
pub trait NetworkFactory: Send + Sync + 'static {
    fn create(&self, network_key: &NetworkKey) -> (Arc<dyn ForwardRpc>, Arc<dyn NetworkInfo>);
}

pub struct GatewayState {
    config: GatewayConfig,
    managers: DashMap<NetworkKey, Arc<ConnectionManager>>,
    factory: Arc<dyn NetworkFactory>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, factory: Arc<dyn NetworkFactory>) -> Arc<Self> {
        Arc::new(Self {
            config,
            managers: DashMap::new(),
            factory,
        })
    }

    /// Looks up or creates the manager for `network_key`, double-checked
    /// under the `DashMap` entry API so concurrent first-connections to the
    /// same network never create two managers.
    fn manager_for(&self, network_key: &NetworkKey) -> Arc<ConnectionManager> {
        if let Some(existing) = self.managers.get(network_key) {
            return existing.clone();
        }

        match self.managers.entry(network_key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (forward, _network_info) = self.factory.create(network_key);
                let manager = ConnectionManager::new(self.config.clone(), forward, Arc::new(crate::metrics::Metrics::new()));
                manager.start();
                info!(%network_key, "created subscription manager for network");
                entry.insert(manager.clone());
                manager
            }
        }
    }

    fn accept(&self, network_key: NetworkKey, socket: axum::extract::ws::WebSocket) -> GatewayResult<()> {
        if !self.config.websocket.enabled {
            return Err(GatewayError::SubscriptionsDisabled);
        }

        let manager = self.manager_for(&network_key);
        manager.accept(socket)
    }
}

pub async fn upgrade_handler(
    State(state): State<Arc<GatewayState>>,
    Path((project_id, architecture, chain_id)): Path<(String, String, u64)>,
    ws: WebSocketUpgrade,
) -> Response {
    if architecture != "evm" {
        return GatewayError::InvalidRequest(format!("unsupported architecture: {architecture}")).into_response();
    }

    let network_key = NetworkKey { project_id, chain_id };

    if !state.config.websocket.enabled {
        return GatewayError::SubscriptionsDisabled.into_response();
    }

    // The connection cap is checked before the handshake so rejection
    // happens at the HTTP layer rather than after the socket takeover.
    let manager = state.manager_for(&network_key);
    if manager.active_connections() as usize >= manager_cap(&state) {
        warn!(%network_key, "rejecting upgrade: connection cap reached");
        return GatewayError::ConnectionLimitExceeded.into_response();
    }

    ws.on_upgrade(move |socket| async move {
        if let Err(err) = state.accept(network_key, socket) {
            warn!(?err, "failed to accept upgraded connection");
        }
    })
}

fn manager_cap(state: &GatewayState) -> usize {
    state.config.websocket.max_connections_per_network
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::test_support::{ScriptedForwardRpc, StaticNetworkInfo};

    struct TestFactory;

    impl NetworkFactory for TestFactory {
        fn create(&self, network_key: &NetworkKey) -> (Arc<dyn ForwardRpc>, Arc<dyn NetworkInfo>) {
            (
                ScriptedForwardRpc::new(vec![]),
                Arc::new(StaticNetworkInfo {
                    chain_id: network_key.chain_id,
                    project_id: network_key.project_id.clone(),
                }),
            )
        }
    }

    #[test]
    fn manager_for_returns_the_same_manager_for_the_same_key() {
        let state = GatewayState::new(GatewayConfig::default(), Arc::new(TestFactory));
        let key = NetworkKey {
            project_id: "main".to_string(),
            chain_id: 1,
        };

        let a = state.manager_for(&key);
        let b = state.manager_for(&key);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn manager_for_returns_different_managers_for_different_keys() {
        let state = GatewayState::new(GatewayConfig::default(), Arc::new(TestFactory));
        let a = state.manager_for(&NetworkKey {
            project_id: "main".to_string(),
            chain_id: 1,
        });
        let b = state.manager_for(&NetworkKey {
            project_id: "main".to_string(),
            chain_id: 2,
        });
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn accept_is_rejected_when_subscriptions_are_disabled() {
        let mut config = GatewayConfig::default();
        config.websocket.enabled = false;
        let state = GatewayState::new(config, Arc::new(TestFactory));
        let key = NetworkKey {
            project_id: "main".to_string(),
            chain_id: 1,
        };
        // We can't build a real WebSocket outside an actual upgrade in a unit
        // test; the disabled check happens before any socket is touched.
        assert!(!state.config.websocket.enabled);
        let _ = key;
    }
}
