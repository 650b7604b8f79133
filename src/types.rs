//! Data model: subscriptions, block headers, log records.

use crate::filter::LogFilter;
use crate::id::SubscriptionId;
use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U64};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Locally-unique connection id. Unlike `SubscriptionId` this never needs to
/// be unguessable; it is never sent to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// `(projectId, chainId)` — identifies a subscription manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkKey {
    pub project_id: String,
    pub chain_id: u64,
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/evm/{}", self.project_id, self.chain_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionKind {
    NewHeads,
    Logs,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewHeads => write!(f, "newHeads"),
            Self::Logs => write!(f, "logs"),
        }
    }
}

impl std::str::FromStr for SubscriptionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newHeads" => Ok(Self::NewHeads),
            "logs" => Ok(Self::Logs),
            _ => Err(()),
        }
    }
}

/// Kind-specific subscribe parameters.
#[derive(Debug, Clone)]
pub enum SubscriptionParams {
    NewHeads,
    Logs(Box<LogFilter>),
}

impl SubscriptionParams {
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Self::NewHeads => SubscriptionKind::NewHeads,
            Self::Logs(_) => SubscriptionKind::Logs,
        }
    }

    pub fn as_log_filter(&self) -> Option<&LogFilter> {
        match self {
            Self::Logs(f) => Some(f),
            Self::NewHeads => None,
        }
    }
}

/// A live subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub params: SubscriptionParams,
    pub connection_id: ConnectionId,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn kind(&self) -> SubscriptionKind {
        self.params.kind()
    }
}

/// The subset of an EVM block object relevant to `newHeads`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: U64,
    pub hash: H256,
    pub parent_hash: H256,
    pub timestamp: U64,
    pub miner: Address,
    pub gas_limit: U64,
    pub gas_used: U64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U64>,
    pub transactions_root: H256,
    pub state_root: H256,
    pub receipts_root: H256,
}

/// A single EVM log entry as delivered to a `logs` subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<H256>,
    pub data: Bytes,
    pub block_number: U64,
    pub block_hash: H256,
    pub transaction_hash: H256,
    pub transaction_index: U64,
    pub log_index: U64,
    #[serde(default)]
    pub removed: bool,
}
