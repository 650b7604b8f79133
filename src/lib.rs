//! The real-time subscription core of a JSON-RPC gateway that fronts
//! EVM-compatible nodes: connection lifecycle, the subscription registry,
//! the head/logs pollers, and the notification broadcaster. Upstream
//! selection, persistence, and concrete metrics backends are left to the
//! embedder through the `forward` module's traits.

pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod connection_manager;
pub mod errors;
pub mod filter;
pub mod forward;
pub mod id;
pub mod jsonrpc;
pub mod manager;
pub mod metrics;
pub mod pollers;
pub mod registry;
pub mod types;
pub mod upgrade;

pub use config::GatewayConfig;
pub use connection_manager::ConnectionManager;
pub use errors::{GatewayError, GatewayResult};
pub use forward::{ForwardRpc, NetworkInfo};
pub use jsonrpc::JsonRpcRequest;
pub use manager::SubscriptionManager;
pub use metrics::Metrics;
pub use types::NetworkKey;
pub use upgrade::{upgrade_handler, GatewayState, NetworkFactory};
