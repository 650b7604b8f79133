//! Broadcaster: turns "subscription X has a new notification"
//! into an actual send on that subscription's connection, without blocking
//! the caller (the poller) on any one slow connection.

use crate::id::SubscriptionId;
use crate::jsonrpc::SubscriptionNotification;
use crate::metrics::Metrics;
use crate::registry::SubscriptionRegistry;
use crate::types::SubscriptionKind;
use axum::extract::ws::Message;
use std::sync::Arc;
use tracing::{trace, warn};

/// Fans notifications out to subscribers. Holds no subscriber state itself;
/// every lookup goes through the registry so a subscription that is removed
/// mid-broadcast is simply skipped, with no in-flight coordination against
/// unsubscribe.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<Metrics>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriptionRegistry>, metrics: Arc<Metrics>) -> Self {
        Self { registry, metrics }
    }

    /// Sends `result` to one subscription. Spawns the actual send so a full
    /// write queue on one connection can't stall the poller driving this
    /// call.
    ///
    /// Backpressure policy: a full queue drops the incoming notification
    /// (not an older queued one: this queue is a `flume::Sender` and nothing
    /// downstream of the sender side can evict an already-queued message)
    /// and closes the connection with reason `"backpressure"`, the same
    /// outcome a full queue has on the response path. A subscriber this far
    /// behind is assumed to be gone or unable to keep up either way.
    pub fn send(&self, id: SubscriptionId, result: serde_json::Value) {
        let Some(subscription) = self.registry.get(id) else {
            trace!(%id, "broadcast target no longer registered");
            return;
        };
        let Some(subscriber) = self.registry.get_subscriber(id) else {
            return;
        };
        let kind = subscription.kind();

        let notification = SubscriptionNotification::new(id, result);
        let payload = match serde_json::to_string(&notification) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%id, ?err, "failed to serialize subscription notification");
                return;
            }
        };

        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            match subscriber.messages.try_send(Message::Text(payload)) {
                Ok(()) => metrics.notification_sent(kind),
                Err(flume::TrySendError::Full(_)) => {
                    trace!(%id, "write queue full, dropping notification and closing connection");
                    metrics.notification_error(kind);
                    let _ = subscriber.closing.send(Some("backpressure"));
                }
                Err(flume::TrySendError::Disconnected(_)) => {
                    trace!(%id, "subscriber queue closed, dropping notification");
                }
            }
        });
    }

    /// Sends the same `result` to every current subscriber of `kind`. Each
    /// subscriber's own filtering (if any) has already happened by the time
    /// this is called; this just fans out the already-matched payload per
    /// subscription id.
    pub fn broadcast_to_kind(&self, kind: SubscriptionKind, result: serde_json::Value) {
        for id in self.registry.list_by_kind(kind) {
            self.send(id, result.clone());
        }
    }
}
