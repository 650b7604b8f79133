//! Minimal runnable entrypoint: serves the upgrade route against a single
//! upstream JSON-RPC node reached over HTTP. Multi-network routing, auth,
//! and upstream selection are embedder concerns; this binary
//! exists so the crate can be exercised end to end without embedding it in
//! a larger gateway.

use anyhow::Context;
use argh::FromArgs;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use hyper::body::Buf;
use hyper::{Body, Client, Method, Request};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use web3_subscribe_gateway::{
    ForwardRpc, GatewayConfig, GatewayState, JsonRpcRequest, NetworkFactory, NetworkInfo,
};

#[derive(FromArgs)]
/// the real-time subscription core of a JSON-RPC gateway, served standalone.
struct CliArgs {
    /// address to listen on
    #[argh(option, default = "SocketAddr::from(([0, 0, 0, 0], 8545))")]
    listen: SocketAddr,

    /// upstream JSON-RPC HTTP endpoint this binary forwards to
    #[argh(option)]
    upstream_url: String,

    /// chain id reported for the single network this binary serves
    #[argh(option, default = "1")]
    chain_id: u64,

    /// project id segment accepted in the upgrade path
    #[argh(option, default = "String::from(\"default\")")]
    project_id: String,

    /// optional TOML file with GatewayConfig overrides
    #[argh(option)]
    config: Option<PathBuf>,
}

/// Forwards every call as an HTTP POST to a single fixed upstream endpoint.
struct HttpForwardRpc {
    upstream_url: String,
    client: Client<hyper::client::HttpConnector>,
}

impl HttpForwardRpc {
    fn new(upstream_url: String) -> Self {
        Self {
            upstream_url,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ForwardRpc for HttpForwardRpc {
    async fn forward(&self, request: JsonRpcRequest) -> anyhow::Result<Value> {
        let body = serde_json::to_vec(&request)?;
        let http_request = Request::builder()
            .method(Method::POST)
            .uri(&self.upstream_url)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .context("building upstream request")?;

        let response = self
            .client
            .request(http_request)
            .await
            .context("upstream request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("upstream returned status {}", response.status());
        }

        let body = hyper::body::aggregate(response).await?;
        let parsed: Value = serde_json::from_reader(body.reader())?;
        parsed
            .get("result")
            .cloned()
            .or_else(|| parsed.get("error").cloned())
            .context("upstream response had neither result nor error")
    }
}

struct StaticNetworkInfo {
    chain_id: u64,
    project_id: String,
}

impl NetworkInfo for StaticNetworkInfo {
    fn id(&self) -> u64 {
        self.chain_id
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }
}

struct SingleUpstreamFactory {
    upstream_url: String,
}

impl NetworkFactory for SingleUpstreamFactory {
    fn create(
        &self,
        network_key: &web3_subscribe_gateway::NetworkKey,
    ) -> (Arc<dyn ForwardRpc>, Arc<dyn NetworkInfo>) {
        (
            Arc::new(HttpForwardRpc::new(self.upstream_url.clone())),
            Arc::new(StaticNetworkInfo {
                chain_id: network_key.chain_id,
                project_id: network_key.project_id.clone(),
            }),
        )
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: CliArgs = argh::from_env();

    let config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw).context("parsing config file")?
        }
        None => GatewayConfig::default(),
    };

    info!(listen = %args.listen, upstream = %args.upstream_url, chain_id = args.chain_id, "starting gateway");

    let factory = Arc::new(SingleUpstreamFactory {
        upstream_url: args.upstream_url.clone(),
    });
    let state = GatewayState::new(config, factory);

    let app = Router::new()
        .route("/healthz", get(health))
        .route(
            "/:project_id/:architecture/:chain_id",
            get(web3_subscribe_gateway::upgrade_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = std::net::TcpListener::bind(args.listen)
        .with_context(|| format!("binding {}", args.listen))?;

    hyper::Server::from_tcp(listener)?
        .serve(app.into_make_service())
        .await
        .context("server error")?;

    Ok(())
}
