//! Subscription ids: opaque, unguessable 128-bit values rendered as
//! `0x`-prefixed hex, the way `eth_subscribe` ids look on real nodes.

use nanorand::{Rng, WyRand};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u128);

impl SubscriptionId {
    /// Generate a new random id. Collisions are practically unreachable at
    /// 128 bits of entropy; the registry still treats one as `AlreadyExists`
    /// rather than assuming it away.
    pub fn generate() -> Self {
        let mut rng = WyRand::new();
        let hi: u64 = rng.generate();
        let lo: u64 = rng.generate();
        Self(((hi as u128) << 64) | lo as u128)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:032x}", self.0)
    }
}

impl std::str::FromStr for SubscriptionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        u128::from_str_radix(s, 16).map(Self)
    }
}

impl serde::Serialize for SubscriptionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for SubscriptionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
