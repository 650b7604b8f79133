//! One error enum for the whole crate, in the style of
//! `web3_proxy::errors::Web3ProxyError`: `derive_more` for the boilerplate,
//! `as_response_parts` to turn a variant into a status code + JSON-RPC error
//! body, nothing in the core panics on bad input.

use crate::jsonrpc::{JsonRpcErrorData, JsonRpcForwardedResponse, JsonRpcId};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use derive_more::{Display, Error, From};
use tracing::{trace, warn};

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Display, Error, From)]
pub enum GatewayError {
    /// Malformed frame / invalid JSON.
    #[display(fmt = "invalid request: {}", _0)]
    #[error(ignore)]
    #[from(ignore)]
    InvalidRequest(String),
    /// Unknown subscription kind or malformed filter.
    #[display(fmt = "invalid params: {}", _0)]
    #[error(ignore)]
    #[from(ignore)]
    InvalidParams(String),
    /// `maxSubscriptionsPerConnection` exceeded.
    SubscriptionLimitExceeded,
    /// `maxConnectionsPerNetwork` exceeded.
    ConnectionLimitExceeded,
    /// Subscriptions disabled by configuration.
    SubscriptionsDisabled,
    /// The connection closed with a reason other than a clean client close.
    #[display(fmt = "connection closed: {}", _0)]
    #[error(ignore)]
    #[from(ignore)]
    ConnectionClosed(String),
    /// Anything returned by the injected `ForwardRpc` collaborator is
    /// propagated verbatim.
    #[error(ignore)]
    Forwarded(anyhow::Error),
    #[error(ignore)]
    Io(std::io::Error),
    #[error(ignore)]
    SerdeJson(serde_json::Error),
    #[error(ignore)]
    Ws(axum::Error),
}

impl GatewayError {
    pub fn as_response_parts(&self) -> (StatusCode, JsonRpcErrorData) {
        match self {
            Self::InvalidRequest(msg) => {
                trace!(%msg, "invalid request");
                (StatusCode::OK, JsonRpcErrorData::invalid_request())
            }
            Self::InvalidParams(msg) => {
                trace!(%msg, "invalid params");
                (StatusCode::OK, JsonRpcErrorData::invalid_params(msg.clone()))
            }
            Self::SubscriptionLimitExceeded => {
                trace!("subscription limit exceeded");
                (
                    StatusCode::OK,
                    JsonRpcErrorData::new(-32000, "subscription limit exceeded for this connection"),
                )
            }
            Self::ConnectionLimitExceeded => {
                trace!("connection limit exceeded");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    JsonRpcErrorData::new(-32000, "connection limit exceeded for this network"),
                )
            }
            Self::SubscriptionsDisabled => {
                trace!("subscriptions disabled");
                (
                    StatusCode::BAD_REQUEST,
                    JsonRpcErrorData::new(-32000, "subscriptions are disabled"),
                )
            }
            Self::ConnectionClosed(reason) => {
                trace!(%reason, "connection closed");
                (
                    StatusCode::OK,
                    JsonRpcErrorData::new(-32000, format!("connection closed: {reason}")),
                )
            }
            Self::Forwarded(err) => {
                // forwarded errors come from the upstream node via ForwardRpc;
                // they are a normal part of traffic, not a gateway fault.
                trace!(?err, "forwarded error");
                (
                    StatusCode::OK,
                    JsonRpcErrorData::new(-32000, err.to_string()),
                )
            }
            Self::Io(err) => {
                warn!(?err, "io error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    JsonRpcErrorData::new(
                        StatusCode::INTERNAL_SERVER_ERROR.as_u16() as i64,
                        "io error",
                    ),
                )
            }
            Self::SerdeJson(err) => {
                trace!(?err, "serde json");
                (StatusCode::OK, JsonRpcErrorData::parse_error())
            }
            Self::Ws(err) => {
                warn!(?err, "websocket error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    JsonRpcErrorData::new(
                        StatusCode::INTERNAL_SERVER_ERROR.as_u16() as i64,
                        "websocket error",
                    ),
                )
            }
        }
    }

    pub fn into_response_with_id(self, id: JsonRpcId) -> Response {
        let (status, data) = self.as_response_parts();
        let body = JsonRpcForwardedResponse::from_error(data, id);
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let id = serde_json::value::RawValue::from_string("null".to_string())
            .expect("null is valid json")
            .into();
        self.into_response_with_id(id)
    }
}
