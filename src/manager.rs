//! Subscription manager: owns one registry, one broadcaster,
//! and both pollers for a single network. Its cancellation scope is rooted
//! here, not in whatever request first created it — `Abortable`/`AbortHandle`
//! mirrors the cancellation idiom `web3_proxy` uses for its own
//! `eth_subscribe` background tasks, so stopping the manager always stops
//! the pollers regardless of which request happens to trigger it.

use crate::broadcaster::Broadcaster;
use crate::errors::{GatewayError, GatewayResult};
use crate::forward::ForwardRpc;
use crate::id::SubscriptionId;
use crate::metrics::Metrics;
use crate::pollers::head::HeadPoller;
use crate::pollers::logs::LogsPoller;
use crate::registry::SubscriptionRegistry;
use crate::types::{ConnectionId, Subscription, SubscriptionKind, SubscriptionParams};
use futures::future::{AbortHandle, Abortable};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct SubscriptionManager {
    registry: Arc<SubscriptionRegistry>,
    broadcaster: Broadcaster,
    metrics: Arc<Metrics>,
    head_poller: Arc<HeadPoller>,
    logs_poller: Arc<LogsPoller>,
    max_subscriptions_per_connection: usize,
    max_log_filters: usize,
    poller_handles: parking_lot::Mutex<Vec<AbortHandle>>,
}

impl SubscriptionManager {
    pub fn new(
        poll_interval: Duration,
        max_subscriptions_per_connection: usize,
        max_log_filters: usize,
        forward: Arc<dyn ForwardRpc>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), metrics.clone());
        let head_poller = Arc::new(HeadPoller::new(
            poll_interval,
            forward.clone(),
            registry.clone(),
            broadcaster.clone(),
            metrics.clone(),
        ));
        let logs_poller = Arc::new(LogsPoller::new(
            poll_interval,
            forward,
            registry.clone(),
            broadcaster.clone(),
            metrics.clone(),
        ));

        Arc::new(Self {
            registry,
            broadcaster,
            metrics,
            head_poller,
            logs_poller,
            max_subscriptions_per_connection,
            max_log_filters,
            poller_handles: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Launches both pollers as independent tasks, rooted at this manager's
    /// own lifetime. Idempotent only in the sense that calling it twice spawns
    /// a second pair of pollers; callers are expected to call it exactly once
    /// per manager.
    pub fn start(self: &Arc<Self>) {
        let (head_handle, head_registration) = AbortHandle::new_pair();
        let (logs_handle, logs_registration) = AbortHandle::new_pair();

        let head_poller = self.head_poller.clone();
        tokio::spawn(Abortable::new(async move { head_poller.run().await }, head_registration));

        let logs_poller = self.logs_poller.clone();
        tokio::spawn(Abortable::new(async move { logs_poller.run().await }, logs_registration));

        let mut handles = self.poller_handles.lock();
        handles.push(head_handle);
        handles.push(logs_handle);
    }

    pub fn subscribe(
        &self,
        params: SubscriptionParams,
        connection_id: ConnectionId,
        subscriber: crate::registry::Subscriber,
    ) -> GatewayResult<SubscriptionId> {
        if self.registry.count_by_connection(connection_id) >= self.max_subscriptions_per_connection {
            return Err(GatewayError::SubscriptionLimitExceeded);
        }
        if params.kind() == SubscriptionKind::Logs
            && self.registry.count_by_kind(SubscriptionKind::Logs) >= self.max_log_filters
        {
            return Err(GatewayError::SubscriptionLimitExceeded);
        }

        let id = SubscriptionId::generate();
        let kind = params.kind();
        let subscription = Subscription {
            id,
            params,
            connection_id,
            created_at: chrono::Utc::now(),
        };

        self.registry
            .add(subscription, subscriber)
            .map_err(|_| GatewayError::SubscriptionLimitExceeded)?;
        self.metrics.subscription_created(kind);

        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let kind = self.registry.get(id).map(|s| s.kind());
        let removed = self.registry.remove(id);
        if removed {
            if let Some(kind) = kind {
                self.metrics.subscription_removed(kind);
            }
        }
        removed
    }

    pub fn unsubscribe_connection(&self, connection_id: ConnectionId) -> usize {
        let ids = self.registry.list_by_connection(connection_id);
        let counts: Vec<SubscriptionKind> = ids.iter().filter_map(|id| self.registry.get(*id)).map(|s| s.kind()).collect();
        let removed = self.registry.remove_by_connection(connection_id);
        for kind in counts {
            self.metrics.subscription_removed(kind);
        }
        removed
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Cancels both pollers. Waiting for them to actually exit is best-effort:
    /// `Abortable` guarantees the task stops at its next suspension point, not
    /// synchronously with this call.
    pub fn stop(&self) {
        info!("stopping subscription manager pollers");
        for handle in self.poller_handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.stop();
    }
}
