//! Filter matcher: test a `LogRecord` against
//! an address + topics `LogFilter`.
//!
//! Simplified relative to `polkadot-evm-frontier`'s `FilteredParams`:
//! only requires per-position OR matching (no cross-position cartesian
//! flattening), so each topic position is checked independently against the
//! corresponding log topic.

use crate::types::LogRecord;
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

/// Absent / single / set-OR, the shape every filter field uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: PartialEq> OneOrMany<T> {
    fn contains(&self, value: &T) -> bool {
        match self {
            Self::One(v) => v == value,
            Self::Many(vs) => vs.iter().any(|v| v == value),
        }
    }
}

/// One topic position: wildcard, a single value, or an OR-set of values.
pub type TopicPosition = Option<OneOrMany<H256>>;

/// The filter attached to a `logs` subscription. Block-range fields are
/// accepted on the wire for compatibility but are ignored for live
/// subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<OneOrMany<Address>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<TopicPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_block: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_block: Option<serde_json::Value>,
}

fn hex_eq(a: &Address, b: &Address) -> bool {
    // Address's PartialEq is already byte-wise, which is case-insensitive by
    // construction: both sides were parsed from hex into the same 20 bytes.
    a == b
}

fn topic_eq(a: &H256, b: &H256) -> bool {
    a == b
}

impl LogFilter {
    /// `true` when `self` has no address and no topics.
    pub fn is_empty(&self) -> bool {
        self.address.is_none() && self.topics.iter().all(|t| t.is_none())
    }

    pub fn matches(&self, log: &LogRecord) -> bool {
        if let Some(address) = &self.address {
            let matched = match address {
                OneOrMany::One(a) => hex_eq(a, &log.address),
                OneOrMany::Many(addrs) => addrs.iter().any(|a| hex_eq(a, &log.address)),
            };
            if !matched {
                return false;
            }
        }

        for (position, wanted) in self.topics.iter().enumerate() {
            let Some(wanted) = wanted else {
                // null / absent position: wildcard.
                continue;
            };

            let actual = log.topics.get(position);
            let matched = match actual {
                None => false,
                Some(actual) => match wanted {
                    OneOrMany::One(t) => topic_eq(t, actual),
                    OneOrMany::Many(ts) => ts.iter().any(|t| topic_eq(t, actual)),
                },
            };

            if !matched {
                return false;
            }
        }

        true
    }
}
