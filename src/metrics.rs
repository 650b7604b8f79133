//! Observability: a fixed set of counters and gauges, labelled
//! by kind and, where relevant, a reason/error/result tag. No concrete
//! metrics backend is wired up; this mirrors
//! `Web3ProxyApp`'s own style of plain atomics and `DashMap` counters rather
//! than a metrics-crate macro, so an embedder can read these fields directly
//! or export them however it likes.

use crate::types::SubscriptionKind;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
struct KindCounters {
    active_subscriptions: AtomicI64,
    created: AtomicU64,
    removed: AtomicU64,
    notifications_sent: AtomicU64,
    notification_errors: AtomicU64,
    polls_new_block: AtomicU64,
    polls_no_change: AtomicU64,
    polls_empty: AtomicU64,
    polls_success: AtomicU64,
    poll_errors: AtomicU64,
}

/// Per-network metrics. One instance lives inside each `SubscriptionManager`.
#[derive(Debug, Default)]
pub struct Metrics {
    active_connections: AtomicI64,
    total_connections: AtomicU64,
    closed_connections: DashMap<&'static str, AtomicU64>,
    messages_received: DashMap<String, AtomicU64>,
    messages_sent: DashMap<&'static str, AtomicU64>,
    by_kind: DashMap<SubscriptionKind, KindCounters>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self, reason: &'static str) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.closed_connections
            .entry(reason)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn closed_connections(&self, reason: &str) -> u64 {
        self.closed_connections
            .get(reason)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn subscription_created(&self, kind: SubscriptionKind) {
        let counters = self.by_kind.entry(kind).or_default();
        counters.active_subscriptions.fetch_add(1, Ordering::Relaxed);
        counters.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_removed(&self, kind: SubscriptionKind) {
        let counters = self.by_kind.entry(kind).or_default();
        counters.active_subscriptions.fetch_sub(1, Ordering::Relaxed);
        counters.removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_subscriptions(&self, kind: SubscriptionKind) -> i64 {
        self.by_kind
            .get(&kind)
            .map(|c| c.active_subscriptions.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn notification_sent(&self, kind: SubscriptionKind) {
        self.by_kind
            .entry(kind)
            .or_default()
            .notifications_sent
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_error(&self, kind: SubscriptionKind) {
        self.by_kind
            .entry(kind)
            .or_default()
            .notification_errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_errors(&self, kind: SubscriptionKind) -> u64 {
        self.by_kind
            .get(&kind)
            .map(|c| c.notification_errors.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn poll_new_block(&self) {
        self.by_kind
            .entry(SubscriptionKind::NewHeads)
            .or_default()
            .polls_new_block
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_no_change(&self, kind: SubscriptionKind) {
        self.by_kind
            .entry(kind)
            .or_default()
            .polls_no_change
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_empty(&self, kind: SubscriptionKind) {
        self.by_kind
            .entry(kind)
            .or_default()
            .polls_empty
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_success(&self, kind: SubscriptionKind) {
        self.by_kind
            .entry(kind)
            .or_default()
            .polls_success
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_error(&self, kind: SubscriptionKind) {
        self.by_kind
            .entry(kind)
            .or_default()
            .poll_errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_errors(&self, kind: SubscriptionKind) -> u64 {
        self.by_kind
            .get(&kind)
            .map(|c| c.poll_errors.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn message_received(&self, method: &str) {
        self.messages_received
            .entry(method.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self, kind: &'static str) {
        self.messages_sent
            .entry(kind)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_open_and_close_keep_active_count_accurate() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.active_connections(), 2);
        assert_eq!(metrics.total_connections(), 2);

        metrics.connection_closed("timeout");
        assert_eq!(metrics.active_connections(), 1);
        assert_eq!(metrics.closed_connections("timeout"), 1);
    }

    #[test]
    fn subscription_created_then_removed_nets_to_zero_active() {
        let metrics = Metrics::new();
        metrics.subscription_created(SubscriptionKind::Logs);
        metrics.subscription_created(SubscriptionKind::Logs);
        metrics.subscription_removed(SubscriptionKind::Logs);
        assert_eq!(metrics.active_subscriptions(SubscriptionKind::Logs), 1);
    }

    #[test]
    fn poll_error_counter_is_isolated_per_kind() {
        let metrics = Metrics::new();
        metrics.poll_error(SubscriptionKind::NewHeads);
        assert_eq!(metrics.poll_errors(SubscriptionKind::NewHeads), 1);
        assert_eq!(metrics.poll_errors(SubscriptionKind::Logs), 0);
    }
}
