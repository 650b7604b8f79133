//! JSON-RPC 2.0 wire types for the client-facing stream and the forwarded
//! upstream calls made through `ForwardRpc`.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::borrow::Cow;

/// A JSON-RPC id. Request ids are echoed back verbatim, including `null`.
pub type JsonRpcId = Box<RawValue>;

fn null_id() -> JsonRpcId {
    RawValue::from_string("null".to_string()).expect("null is valid json").into()
}

/// A single client -> server request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default = "null_id")]
    pub id: JsonRpcId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: JsonRpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Clients may send either a single request or a batch.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum JsonRpcRequestEnum {
    Single(JsonRpcRequest),
    Batch(Vec<JsonRpcRequest>),
}

/// `{"code": ..., "message": ..., "data": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    pub code: i64,
    pub message: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    pub fn new(code: i64, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request() -> Self {
        Self::new(-32600, "invalid request")
    }

    pub fn invalid_params(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(-32602, msg)
    }

    pub fn parse_error() -> Self {
        Self::new(-32700, "parse error")
    }
}

/// Either a `result` or an `error`, never both. Mirrors the shape of a real
/// JSON-RPC response so it serializes without an extra wrapper enum tag.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcForwardedResponse {
    pub jsonrpc: Cow<'static, str>,
    pub id: JsonRpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorData>,
}

impl JsonRpcForwardedResponse {
    pub fn from_value(result: Value, id: JsonRpcId) -> Self {
        Self {
            jsonrpc: Cow::Borrowed("2.0"),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn from_error(error: JsonRpcErrorData, id: JsonRpcId) -> Self {
        Self {
            jsonrpc: Cow::Borrowed("2.0"),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Matches `JsonRpcRequestEnum`: a response is single or batched the same way
/// the request was.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcForwardedResponseEnum {
    Single(JsonRpcForwardedResponse),
    Batch(Vec<JsonRpcForwardedResponse>),
}

/// `{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":id,"result":payload}}`
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionNotification {
    pub jsonrpc: Cow<'static, str>,
    pub method: Cow<'static, str>,
    pub params: SubscriptionNotificationParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionNotificationParams {
    pub subscription: String,
    pub result: Value,
}

impl SubscriptionNotification {
    pub fn new(subscription_id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed("2.0"),
            method: Cow::Borrowed("eth_subscription"),
            params: SubscriptionNotificationParams {
                subscription: subscription_id.into(),
                result,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newHeads"]}"#;
        let parsed: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.method, "eth_subscribe");
        assert_eq!(parsed.id.get(), "1");
    }

    #[test]
    fn missing_id_defaults_to_null() {
        let raw = r#"{"jsonrpc":"2.0","method":"eth_subscribe","params":["newHeads"]}"#;
        let parsed: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.id.get(), "null");
    }

    #[test]
    fn notification_serializes_with_subscription_method() {
        let note = SubscriptionNotification::new("0xabc", serde_json::json!({"number": "0x1"}));
        let s = serde_json::to_string(&note).unwrap();
        assert!(s.contains(r#""method":"eth_subscription""#));
        assert!(s.contains(r#""subscription":"0xabc""#));
    }

    #[test]
    fn error_response_omits_result_field() {
        let id: JsonRpcId = RawValue::from_string("5".to_string()).unwrap().into();
        let resp = JsonRpcForwardedResponse::from_error(JsonRpcErrorData::invalid_request(), id);
        let s = serde_json::to_string(&resp).unwrap();
        assert!(!s.contains("\"result\""));
        assert!(s.contains("\"error\""));
    }
}
