//! Head poller: diffs `eth_getBlockByNumber("latest", false)`
//! against the last seen header and emits at most one `newHeads` broadcast
//! per distinct block number.

use super::PollOutcome;
use crate::broadcaster::Broadcaster;
use crate::forward::ForwardRpc;
use crate::jsonrpc::JsonRpcRequest;
use crate::metrics::Metrics;
use crate::registry::SubscriptionRegistry;
use crate::types::{BlockHeader, SubscriptionKind};
use parking_lot::RwLock;
use serde_json::value::RawValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

fn request_id() -> crate::jsonrpc::JsonRpcId {
    RawValue::from_string("1".to_string()).expect("valid json").into()
}

pub struct HeadPoller {
    last_seen: RwLock<Option<BlockHeader>>,
    poll_interval: Duration,
    forward: Arc<dyn ForwardRpc>,
    registry: Arc<SubscriptionRegistry>,
    broadcaster: Broadcaster,
    metrics: Arc<Metrics>,
}

impl HeadPoller {
    pub fn new(
        poll_interval: Duration,
        forward: Arc<dyn ForwardRpc>,
        registry: Arc<SubscriptionRegistry>,
        broadcaster: Broadcaster,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            last_seen: RwLock::new(None),
            poll_interval,
            forward,
            registry,
            broadcaster,
            metrics,
        }
    }

    /// Runs until cancelled. Ticks immediately on start.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.tick().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn tick(&self) -> PollOutcome {
        if self.registry.count_by_kind(SubscriptionKind::NewHeads) == 0 {
            return PollOutcome::Skipped;
        }

        let request = JsonRpcRequest::new(
            request_id(),
            "eth_getBlockByNumber",
            Some(serde_json::json!(["latest", false])),
        );

        let result = match self.forward.forward(request).await {
            Ok(result) => result,
            Err(err) => {
                warn!(?err, "head poller: forward failed");
                self.metrics.poll_error(SubscriptionKind::NewHeads);
                return PollOutcome::Error;
            }
        };

        if result.is_null() {
            debug!("head poller: empty block result");
            self.metrics.poll_empty(SubscriptionKind::NewHeads);
            return PollOutcome::Empty;
        }

        let header: BlockHeader = match serde_json::from_value(result) {
            Ok(header) => header,
            Err(err) => {
                warn!(?err, "head poller: malformed block header");
                self.metrics.poll_error(SubscriptionKind::NewHeads);
                return PollOutcome::Error;
            }
        };

        let is_new = {
            let last_seen = self.last_seen.read();
            match last_seen.as_ref() {
                None => true,
                Some(last) => last.number != header.number,
            }
        };

        if !is_new {
            trace!(number = %header.number, "head poller: no change");
            self.metrics.poll_no_change(SubscriptionKind::NewHeads);
            return PollOutcome::NoChange;
        }

        let payload = serde_json::to_value(&header).expect("BlockHeader always serializes");
        *self.last_seen.write() = Some(header);
        self.metrics.poll_new_block();
        self.broadcaster
            .broadcast_to_kind(SubscriptionKind::NewHeads, payload);

        PollOutcome::NewBlock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::test_support::ScriptedForwardRpc;
    use crate::id::SubscriptionId;
    use crate::types::{ConnectionId, Subscription, SubscriptionParams};
    use chrono::Utc;

    fn header_json(number: &str) -> serde_json::Value {
        serde_json::json!({
            "number": number,
            "hash": format!("0x{:0>64}", "1"),
            "parentHash": format!("0x{:0>64}", "0"),
            "timestamp": "0x1",
            "miner": "0x0000000000000000000000000000000000000001",
            "gasLimit": "0x1",
            "gasUsed": "0x1",
            "transactionsRoot": format!("0x{:0>64}", "2"),
            "stateRoot": format!("0x{:0>64}", "3"),
            "receiptsRoot": format!("0x{:0>64}", "4"),
        })
    }

    fn subscribe_new_heads(registry: &SubscriptionRegistry) {
        let (tx, _rx) = flume::bounded(8);
        registry
            .add(
                Subscription {
                    id: SubscriptionId::generate(),
                    params: SubscriptionParams::NewHeads,
                    connection_id: ConnectionId(1),
                    created_at: Utc::now(),
                },
                crate::registry::Subscriber {
                    messages: tx,
                    closing: tokio::sync::watch::channel(None).0,
                },
            )
            .unwrap();
    }

    fn poller(forward: Arc<ScriptedForwardRpc>, registry: Arc<SubscriptionRegistry>) -> HeadPoller {
        let metrics = Arc::new(Metrics::new());
        HeadPoller::new(
            Duration::from_secs(2),
            forward,
            registry.clone(),
            Broadcaster::new(registry, metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn no_subscribers_skips_the_tick() {
        let forward = ScriptedForwardRpc::new(vec![]);
        let registry = Arc::new(SubscriptionRegistry::new());
        let p = poller(forward.clone(), registry);
        assert_eq!(p.tick().await, PollOutcome::Skipped);
        assert_eq!(forward.call_count(), 0);
    }

    #[tokio::test]
    async fn first_tick_with_a_header_always_emits() {
        let forward = ScriptedForwardRpc::new(vec![Ok(header_json("0x1"))]);
        let registry = Arc::new(SubscriptionRegistry::new());
        subscribe_new_heads(&registry);
        let p = poller(forward, registry);
        assert_eq!(p.tick().await, PollOutcome::NewBlock);
    }

    #[tokio::test]
    async fn same_number_twice_emits_once() {
        let forward = ScriptedForwardRpc::new(vec![Ok(header_json("0x5")), Ok(header_json("0x5"))]);
        let registry = Arc::new(SubscriptionRegistry::new());
        subscribe_new_heads(&registry);
        let p = poller(forward, registry);
        assert_eq!(p.tick().await, PollOutcome::NewBlock);
        assert_eq!(p.tick().await, PollOutcome::NoChange);
    }

    #[tokio::test]
    async fn a_new_number_after_no_change_emits_again() {
        let forward = ScriptedForwardRpc::new(vec![Ok(header_json("0x5")), Ok(header_json("0x6"))]);
        let registry = Arc::new(SubscriptionRegistry::new());
        subscribe_new_heads(&registry);
        let p = poller(forward, registry);
        assert_eq!(p.tick().await, PollOutcome::NewBlock);
        assert_eq!(p.tick().await, PollOutcome::NewBlock);
    }

    #[tokio::test]
    async fn forward_error_is_swallowed_as_a_poll_error() {
        let forward = ScriptedForwardRpc::new(vec![Err(anyhow::anyhow!("upstream unreachable"))]);
        let registry = Arc::new(SubscriptionRegistry::new());
        subscribe_new_heads(&registry);
        let p = poller(forward, registry);
        assert_eq!(p.tick().await, PollOutcome::Error);
    }

    #[tokio::test]
    async fn null_result_is_treated_as_empty_not_an_error() {
        let forward = ScriptedForwardRpc::new(vec![Ok(serde_json::Value::Null)]);
        let registry = Arc::new(SubscriptionRegistry::new());
        subscribe_new_heads(&registry);
        let p = poller(forward, registry);
        assert_eq!(p.tick().await, PollOutcome::Empty);
    }
}
