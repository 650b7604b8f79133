//! Subscription registry: a concurrent index of live
//! subscriptions, with three views — byId, byKind, byConnection — kept in
//! sync under a single lock so pollers and connection teardown never observe
//! a partially-updated structure.

use crate::id::SubscriptionId;
use crate::types::{ConnectionId, Subscription, SubscriptionKind};
use dashmap::DashMap;
use flume::Sender;
use derive_more::{Display, Error};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use tokio::sync::watch;

/// Handle the broadcaster uses to actually deliver a notification: the
/// owning connection's outbound message queue, plus that connection's close
/// signal so a notification that can't be delivered can also close it.
#[derive(Clone)]
pub struct Subscriber {
    pub messages: Sender<axum::extract::ws::Message>,
    pub closing: watch::Sender<Option<&'static str>>,
}

#[derive(Debug, Display, Error)]
pub enum RegistryError {
    #[display(fmt = "subscription id already exists")]
    AlreadyExists,
}

struct Entry {
    subscription: Subscription,
    subscriber: Subscriber,
}

/// One registry per network.
///
/// `byKind`/`byConnection` store ordered id sets so `listByKind` and
/// `removeByConnection` iterate deterministically; `byId` is the source of
/// truth for subscription data. All three live behind one `parking_lot::RwLock`
/// (a single lock, reader-preferring), sufficient at the expected scale of up
/// to 10k connections with up to 100 subscriptions each.
pub struct SubscriptionRegistry {
    by_id: RwLock<DashMap<SubscriptionId, Entry>>,
    by_kind: RwLock<DashMap<SubscriptionKind, BTreeSet<SubscriptionId>>>,
    by_connection: RwLock<DashMap<ConnectionId, BTreeSet<SubscriptionId>>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            by_id: RwLock::new(DashMap::new()),
            by_kind: RwLock::new(DashMap::new()),
            by_connection: RwLock::new(DashMap::new()),
        }
    }

    /// Inserts into all three views. `AlreadyExists` is practically
    /// unreachable given 128-bit random ids but is still a
    /// real error rather than an assumed-away case.
    pub fn add(&self, subscription: Subscription, subscriber: Subscriber) -> Result<(), RegistryError> {
        let id = subscription.id;
        let kind = subscription.kind();
        let connection_id = subscription.connection_id;

        let by_id = self.by_id.write();
        if by_id.contains_key(&id) {
            return Err(RegistryError::AlreadyExists);
        }
        by_id.insert(
            id,
            Entry {
                subscription,
                subscriber,
            },
        );
        drop(by_id);

        self.by_kind.write().entry(kind).or_default().insert(id);
        self.by_connection
            .write()
            .entry(connection_id)
            .or_default()
            .insert(id);

        Ok(())
    }

    /// Idempotent: removing an unknown id is a no-op and returns `false`.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.by_id.write().remove(&id);
        let Some((_, entry)) = removed else {
            return false;
        };

        if let Some(mut ids) = self.by_kind.write().get_mut(&entry.subscription.kind()) {
            ids.remove(&id);
        }
        if let Some(mut ids) = self
            .by_connection
            .write()
            .get_mut(&entry.subscription.connection_id)
        {
            ids.remove(&id);
        }

        true
    }

    /// Bulk remove every subscription owned by `connection_id`; returns the
    /// count removed, for metrics.
    pub fn remove_by_connection(&self, connection_id: ConnectionId) -> usize {
        let ids: Vec<SubscriptionId> = self
            .by_connection
            .write()
            .remove(&connection_id)
            .map(|(_, ids)| ids.into_iter().collect())
            .unwrap_or_default();

        if ids.is_empty() {
            return 0;
        }

        let by_id = self.by_id.write();
        let by_kind = self.by_kind.write();
        let mut removed = 0;
        for id in ids {
            if let Some((_, entry)) = by_id.remove(&id) {
                if let Some(mut kind_ids) = by_kind.get_mut(&entry.subscription.kind()) {
                    kind_ids.remove(&id);
                }
                removed += 1;
            }
        }

        removed
    }

    pub fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        self.by_id
            .read()
            .get(&id)
            .map(|entry| entry.subscription.clone())
    }

    pub fn get_subscriber(&self, id: SubscriptionId) -> Option<Subscriber> {
        self.by_id
            .read()
            .get(&id)
            .map(|entry| entry.subscriber.clone())
    }

    /// Snapshot read: returns a copy of the id list so iteration can't
    /// observe a mid-mutation view.
    pub fn list_by_kind(&self, kind: SubscriptionKind) -> Vec<SubscriptionId> {
        self.by_kind
            .read()
            .get(&kind)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn list_by_connection(&self, connection_id: ConnectionId) -> Vec<SubscriptionId> {
        self.by_connection
            .read()
            .get(&connection_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.by_id.read().len()
    }

    pub fn count_by_kind(&self, kind: SubscriptionKind) -> usize {
        self.by_kind
            .read()
            .get(&kind)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    pub fn count_by_connection(&self, connection_id: ConnectionId) -> usize {
        self.by_connection
            .read()
            .get(&connection_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }
}
