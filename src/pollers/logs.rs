//! Logs poller: for each `logs` subscription, fetches
//! `(fromBlock, toBlock]` upstream with the filter forwarded verbatim so the
//! upstream can pre-filter, then re-applies the filter locally before
//! broadcasting.
//!
//! `lastBlockNumber` advances before the fetch: a failed fetch skips that
//! tick's window rather than retrying it on the next tick.

use super::PollOutcome;
use crate::broadcaster::Broadcaster;
use crate::forward::ForwardRpc;
use crate::jsonrpc::JsonRpcRequest;
use crate::metrics::Metrics;
use crate::registry::SubscriptionRegistry;
use crate::types::{LogRecord, SubscriptionKind};
use ethers::types::U64;
use parking_lot::RwLock;
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

fn request_id() -> crate::jsonrpc::JsonRpcId {
    RawValue::from_string("1".to_string()).expect("valid json").into()
}

fn hex_block(number: U64) -> String {
    format!("{number:#x}")
}

pub struct LogsPoller {
    last_block_number: RwLock<Option<U64>>,
    poll_interval: Duration,
    forward: Arc<dyn ForwardRpc>,
    registry: Arc<SubscriptionRegistry>,
    broadcaster: Broadcaster,
    metrics: Arc<Metrics>,
}

impl LogsPoller {
    pub fn new(
        poll_interval: Duration,
        forward: Arc<dyn ForwardRpc>,
        registry: Arc<SubscriptionRegistry>,
        broadcaster: Broadcaster,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            last_block_number: RwLock::new(None),
            poll_interval,
            forward,
            registry,
            broadcaster,
            metrics,
        }
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            self.tick().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn tick(&self) -> PollOutcome {
        let ids = self.registry.list_by_kind(SubscriptionKind::Logs);
        if ids.is_empty() {
            return PollOutcome::Skipped;
        }

        let current = match self.current_block_number().await {
            Ok(current) => current,
            Err(()) => return PollOutcome::Error,
        };

        let from_block = self.last_block_number.read().unwrap_or(current);
        let to_block = current;
        *self.last_block_number.write() = Some(current);

        let mut any_matched = false;

        for id in ids {
            let Some(subscription) = self.registry.get(id) else {
                continue;
            };
            let Some(filter) = subscription.params.as_log_filter() else {
                continue;
            };

            let records = match self.fetch_logs(filter, from_block, to_block).await {
                Ok(records) => records,
                Err(()) => continue,
            };

            for record in records {
                if filter.matches(&record) {
                    any_matched = true;
                    let payload = match serde_json::to_value(&record) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(?err, "logs poller: failed to serialize log record");
                            continue;
                        }
                    };
                    self.broadcaster.send(id, payload);
                }
            }
        }

        if any_matched {
            self.metrics.poll_success(SubscriptionKind::Logs);
            PollOutcome::Success
        } else {
            self.metrics.poll_empty(SubscriptionKind::Logs);
            PollOutcome::Empty
        }
    }

    async fn current_block_number(&self) -> Result<U64, ()> {
        let request = JsonRpcRequest::new(request_id(), "eth_blockNumber", None);
        let result = self.forward.forward(request).await.map_err(|err| {
            warn!(?err, "logs poller: eth_blockNumber failed");
            self.metrics.poll_error(SubscriptionKind::Logs);
        })?;

        serde_json::from_value(result).map_err(|err| {
            warn!(?err, "logs poller: malformed eth_blockNumber result");
            self.metrics.poll_error(SubscriptionKind::Logs);
        })
    }

    async fn fetch_logs(
        &self,
        filter: &crate::filter::LogFilter,
        from_block: U64,
        to_block: U64,
    ) -> Result<Vec<LogRecord>, ()> {
        let mut params = Map::new();
        params.insert("fromBlock".to_string(), Value::String(hex_block(from_block)));
        params.insert("toBlock".to_string(), Value::String(hex_block(to_block)));
        if let Some(address) = &filter.address {
            params.insert(
                "address".to_string(),
                serde_json::to_value(address).map_err(|_| ())?,
            );
        }
        if !filter.topics.is_empty() {
            params.insert(
                "topics".to_string(),
                serde_json::to_value(&filter.topics).map_err(|_| ())?,
            );
        }

        let request = JsonRpcRequest::new(
            request_id(),
            "eth_getLogs",
            Some(Value::Array(vec![Value::Object(params)])),
        );

        let result = self.forward.forward(request).await.map_err(|err| {
            trace!(?err, "logs poller: eth_getLogs failed for one subscription");
            self.metrics.poll_error(SubscriptionKind::Logs);
        })?;

        serde_json::from_value(result).map_err(|err| {
            warn!(?err, "logs poller: malformed eth_getLogs result");
            self.metrics.poll_error(SubscriptionKind::Logs);
        })
    }
}
