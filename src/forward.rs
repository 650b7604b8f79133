//! Injected collaborators. The core treats both as opaque: all
//! upstream selection, retry, hedging, and network metadata live on the
//! other side of these traits.

use crate::jsonrpc::JsonRpcRequest;
use async_trait::async_trait;
use serde_json::Value;

/// `(ctx, request) -> (response, error)`. Encapsulates upstream selection,
/// retry, and hedging; the subscription core only ever calls `forward`.
#[async_trait]
pub trait ForwardRpc: Send + Sync + 'static {
    async fn forward(&self, request: JsonRpcRequest) -> anyhow::Result<Value>;
}

/// Read-only network metadata used for metric labels and the manager key.
pub trait NetworkInfo: Send + Sync + 'static {
    fn id(&self) -> u64;
    fn project_id(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// A `ForwardRpc` stub driven from a scripted queue of responses, used
    /// by poller/connection unit tests that need deterministic upstream
    /// behavior without a real node.
    pub struct ScriptedForwardRpc {
        responses: Mutex<Vec<anyhow::Result<Value>>>,
        calls: AtomicU64,
    }

    impl ScriptedForwardRpc {
        pub fn new(responses: Vec<anyhow::Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicU64::new(0),
            })
        }

        pub fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ForwardRpc for ScriptedForwardRpc {
        async fn forward(&self, _request: JsonRpcRequest) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                anyhow::bail!("scripted forward rpc ran out of responses");
            }
            responses.remove(0)
        }
    }

    pub struct StaticNetworkInfo {
        pub chain_id: u64,
        pub project_id: String,
    }

    impl NetworkInfo for StaticNetworkInfo {
        fn id(&self) -> u64 {
            self.chain_id
        }

        fn project_id(&self) -> &str {
            &self.project_id
        }
    }
}
