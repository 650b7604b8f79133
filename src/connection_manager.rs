//! Connection manager: one per network key. Holds the live
//! connection set and the subscription manager, and enforces
//! `maxConnectionsPerNetwork`.

use crate::config::{GatewayConfig, WebsocketConfig};
use crate::connection;
use crate::errors::{GatewayError, GatewayResult};
use crate::forward::ForwardRpc;
use crate::manager::SubscriptionManager;
use crate::metrics::Metrics;
use crate::types::ConnectionId;
use axum::extract::ws::WebSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

pub struct ConnectionManager {
    websocket: WebsocketConfig,
    proxy_other_methods: bool,
    subscriptions: Arc<SubscriptionManager>,
    forward: Arc<dyn ForwardRpc>,
    metrics: Arc<Metrics>,
    next_connection_id: AtomicU64,
    active_connections: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionManager {
    pub fn new(config: GatewayConfig, forward: Arc<dyn ForwardRpc>, metrics: Arc<Metrics>) -> Arc<Self> {
        let subscriptions = SubscriptionManager::new(
            config.subscription.poll_interval(),
            config.websocket.max_subscriptions_per_connection,
            config.subscription.max_log_filters,
            forward.clone(),
            metrics.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Arc::new(Self {
            websocket: config.websocket,
            proxy_other_methods: config.proxy_other_methods,
            subscriptions,
            forward,
            metrics,
            next_connection_id: AtomicU64::new(1),
            active_connections: AtomicU64::new(0),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn start(&self) {
        self.subscriptions.start();
    }

    /// Checks the connection cap and, if there's room, spawns `connection::serve`
    /// for `socket`. Returns an error (handshake-time, before any upgrade I/O)
    /// when the network is already at `maxConnectionsPerNetwork`.
    pub fn accept(self: &Arc<Self>, socket: WebSocket) -> GatewayResult<()> {
        if self.active_connections.load(Ordering::SeqCst) as usize >= self.websocket.max_connections_per_network {
            return Err(GatewayError::ConnectionLimitExceeded);
        }
        self.active_connections.fetch_add(1, Ordering::SeqCst);

        let connection_id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::SeqCst));
        let manager = self.subscriptions.clone();
        let forward = self.forward.clone();
        let websocket = self.websocket.clone();
        let metrics = self.metrics.clone();
        let proxy_other_methods = self.proxy_other_methods;
        let this = self.clone();

        let shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            connection::serve(
                socket,
                connection_id,
                manager,
                forward,
                websocket,
                metrics,
                proxy_other_methods,
                shutdown_rx,
            )
            .await;
            this.active_connections.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(())
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Broadcasts a close signal to every live connection on this network and
    /// stops the subscription manager's pollers.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.subscriptions.stop();
    }
}
