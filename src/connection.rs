//! Connection: one client stream. Owns a read task and a
//! write task, a keepalive timer, and teardown that bulk-removes every
//! subscription this connection owned.

use crate::config::WebsocketConfig;
use crate::errors::GatewayError;
use crate::forward::ForwardRpc;
use crate::id::SubscriptionId;
use crate::jsonrpc::{JsonRpcForwardedResponse, JsonRpcId, JsonRpcRequest};
use crate::manager::SubscriptionManager;
use crate::metrics::Metrics;
use crate::types::{ConnectionId, SubscriptionParams};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Runs one client connection to completion: spawns the read/write/keepalive
/// tasks, waits for all of them to finish, then tears down. Returns once the
/// connection is fully closed.
pub async fn serve(
    socket: WebSocket,
    connection_id: ConnectionId,
    manager: Arc<SubscriptionManager>,
    forward: Arc<dyn ForwardRpc>,
    config: WebsocketConfig,
    metrics: Arc<Metrics>,
    proxy_other_methods: bool,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    metrics.connection_opened();
    info!(%connection_id, "connection opened");

    let (write_tx, write_rx) = flume::bounded::<Message>(config.write_buffer_size);
    let (mut sink, mut stream) = socket.split();
    let last_activity = Arc::new(Mutex::new(Instant::now()));
    let (closing_tx, _) = watch::channel(None::<&'static str>);
    let torn_down = Arc::new(AtomicBool::new(false));

    let shutdown_task = {
        let closing_tx = closing_tx.clone();
        tokio::spawn(async move {
            if shutdown_rx.changed().await.is_ok() && *shutdown_rx.borrow() {
                let _ = closing_tx.send(Some("shutdown"));
            }
        })
    };

    let write_task = {
        let closing_tx = closing_tx.clone();
        let mut closing_rx = closing_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = closing_rx.changed() => break,
                    msg = write_rx.recv_async() => {
                        match msg {
                            Ok(msg) => {
                                if sink.send(msg).await.is_err() {
                                    if closing_rx.borrow().is_none() {
                                        let _ = closing_tx.send(Some("error"));
                                    }
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
            let _ = sink.close().await;
        })
    };

    let ping_task = {
        let write_tx = write_tx.clone();
        let last_activity = last_activity.clone();
        let closing_tx = closing_tx.clone();
        let ping_interval = config.ping_interval();
        let pong_timeout = config.pong_timeout();
        let mut closing_rx = closing_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = closing_rx.changed() => break,
                    _ = tokio::time::sleep(ping_interval) => {}
                }
                if closing_rx.borrow().is_some() {
                    break;
                }
                if write_tx.try_send(Message::Ping(Vec::new())).is_err() {
                    let _ = closing_tx.send(Some("error"));
                    break;
                }
                if last_activity.lock().elapsed() > pong_timeout {
                    let _ = closing_tx.send(Some("timeout"));
                    break;
                }
            }
        })
    };

    let read_task = {
        let write_tx = write_tx.clone();
        let last_activity = last_activity.clone();
        let closing_tx = closing_tx.clone();
        let manager = manager.clone();
        let forward = forward.clone();
        let metrics = metrics.clone();
        let mut closing_rx = closing_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = closing_rx.changed() => None,
                    frame = stream.next() => frame,
                };
                let Some(frame) = next else {
                    if closing_rx.borrow().is_none() {
                        let _ = closing_tx.send(Some("client_close"));
                    }
                    break;
                };

                *last_activity.lock() = Instant::now();

                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(%connection_id, ?err, "read error");
                        let _ = closing_tx.send(Some("error"));
                        break;
                    }
                };

                match frame {
                    Message::Text(text) => {
                        let backpressure = handle_frame(
                            &text,
                            connection_id,
                            &manager,
                            forward.as_ref(),
                            &write_tx,
                            &closing_tx,
                            &metrics,
                            proxy_other_methods,
                        )
                        .await;
                        if backpressure {
                            let _ = closing_tx.send(Some("backpressure"));
                            break;
                        }
                    }
                    Message::Close(_) => {
                        let _ = closing_tx.send(Some("client_close"));
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {
                        // any inbound traffic refreshes the pong deadline; no
                        // further action needed for these frame kinds.
                    }
                }
            }
        })
    };

    let _ = read_task.await;
    let _ = ping_task.await;
    drop(write_tx);
    let _ = write_task.await;
    shutdown_task.abort();

    let reason = *closing_tx.borrow();
    teardown(
        connection_id,
        &manager,
        &metrics,
        &torn_down,
        reason.unwrap_or("client_close"),
    );
}

/// Idempotent: safe to call more than once, only the first call has effect.
fn teardown(
    connection_id: ConnectionId,
    manager: &SubscriptionManager,
    metrics: &Metrics,
    torn_down: &AtomicBool,
    reason: &'static str,
) {
    if torn_down.swap(true, Ordering::SeqCst) {
        return;
    }
    let removed = manager.unsubscribe_connection(connection_id);
    metrics.connection_closed(reason);
    info!(%connection_id, reason, removed, "connection closed");
}

/// Handles one inbound text frame. Returns `true` when the response write
/// queue was found full while sending a response: responses must never be
/// silently dropped, so the caller tears the connection down with reason
/// `"backpressure"` instead.
async fn handle_frame(
    text: &str,
    connection_id: ConnectionId,
    manager: &SubscriptionManager,
    forward: &dyn ForwardRpc,
    write_tx: &flume::Sender<Message>,
    closing_tx: &watch::Sender<Option<&'static str>>,
    metrics: &Metrics,
    proxy_other_methods: bool,
) -> bool {
    let request: JsonRpcRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            trace!(?err, "malformed json-rpc frame");
            let error = GatewayError::InvalidRequest(err.to_string());
            let (_, data) = error.as_response_parts();
            let id: JsonRpcId = serde_json::value::RawValue::from_string("null".to_string())
                .expect("null is valid json")
                .into();
            send_response(write_tx, JsonRpcForwardedResponse::from_error(data, id));
            metrics.message_sent("response");
            return false;
        }
    };

    metrics.message_received(&request.method);

    let response = match request.method.as_str() {
        "eth_subscribe" => handle_subscribe(&request, connection_id, manager, write_tx, closing_tx),
        "eth_unsubscribe" => handle_unsubscribe(&request, manager),
        _ if proxy_other_methods => handle_forward(&request, forward).await,
        _ => Err(GatewayError::InvalidRequest(format!(
            "method not supported over this stream: {}",
            request.method
        ))),
    };

    let body = match response {
        Ok(value) => JsonRpcForwardedResponse::from_value(value, request.id),
        Err(err) => {
            let (_, data) = err.as_response_parts();
            JsonRpcForwardedResponse::from_error(data, request.id)
        }
    };

    let payload = match serde_json::to_string(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(?err, "failed to serialize response");
            return false;
        }
    };

    if write_tx.try_send(Message::Text(payload)).is_err() {
        warn!(%connection_id, "write queue full while sending a response, closing");
        return true;
    }
    metrics.message_sent("response");
    false
}

fn handle_subscribe(
    request: &JsonRpcRequest,
    connection_id: ConnectionId,
    manager: &SubscriptionManager,
    write_tx: &flume::Sender<Message>,
    closing_tx: &watch::Sender<Option<&'static str>>,
) -> Result<Value, GatewayError> {
    let params = parse_subscribe_params(request.params.as_ref())?;
    let subscriber = crate::registry::Subscriber {
        messages: write_tx.clone(),
        closing: closing_tx.clone(),
    };
    let id = manager.subscribe(params, connection_id, subscriber)?;
    Ok(Value::String(id.to_string()))
}

fn parse_subscribe_params(params: Option<&Value>) -> Result<SubscriptionParams, GatewayError> {
    let array = params
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::InvalidParams("eth_subscribe expects an array".to_string()))?;

    let kind = array
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidParams("missing subscription kind".to_string()))?;

    match kind {
        "newHeads" => Ok(SubscriptionParams::NewHeads),
        "logs" => {
            let filter = match array.get(1) {
                Some(value) => serde_json::from_value(value.clone())
                    .map_err(|err| GatewayError::InvalidParams(format!("bad log filter: {err}")))?,
                None => crate::filter::LogFilter::default(),
            };
            Ok(SubscriptionParams::Logs(Box::new(filter)))
        }
        other => Err(GatewayError::InvalidParams(format!(
            "unsupported subscription kind: {other}"
        ))),
    }
}

fn handle_unsubscribe(
    request: &JsonRpcRequest,
    manager: &SubscriptionManager,
) -> Result<Value, GatewayError> {
    let array = request
        .params
        .as_ref()
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::InvalidParams("eth_unsubscribe expects an array".to_string()))?;

    let id_str = array
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidParams("missing subscription id".to_string()))?;

    // a malformed id string is simply "not found", not an error.
    let found = SubscriptionId::from_str(id_str)
        .ok()
        .map(|id| manager.unsubscribe(id))
        .unwrap_or(false);

    Ok(Value::Bool(found))
}

async fn handle_forward(request: &JsonRpcRequest, forward: &dyn ForwardRpc) -> Result<Value, GatewayError> {
    forward
        .forward(request.clone())
        .await
        .map_err(GatewayError::Forwarded)
}

fn send_response(write_tx: &flume::Sender<Message>, body: JsonRpcForwardedResponse) {
    if let Ok(payload) = serde_json::to_string(&body) {
        let _ = write_tx.try_send(Message::Text(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::test_support::ScriptedForwardRpc;
    use crate::metrics::Metrics;
    use std::time::Duration;

    fn manager() -> Arc<SubscriptionManager> {
        let forward = ScriptedForwardRpc::new(vec![]);
        SubscriptionManager::new(Duration::from_secs(2), 100, 50, forward, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_round_trips_through_frame_handling() {
        let manager = manager();
        let forward = ScriptedForwardRpc::new(vec![]);
        let (write_tx, write_rx) = flume::bounded(8);
        let closing_tx = watch::channel(None::<&'static str>).0;
        let metrics = Metrics::new();

        handle_frame(
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newHeads"]}"#,
            ConnectionId(1),
            &manager,
            forward.as_ref(),
            &write_tx,
            &closing_tx,
            &metrics,
            true,
        )
        .await;

        let Message::Text(text) = write_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        let id = response["result"].as_str().unwrap().to_string();
        assert!(id.starts_with("0x"));

        let unsubscribe_frame = format!(
            r#"{{"jsonrpc":"2.0","id":2,"method":"eth_unsubscribe","params":["{id}"]}}"#
        );
        handle_frame(
            &unsubscribe_frame,
            ConnectionId(1),
            &manager,
            forward.as_ref(),
            &write_tx,
            &closing_tx,
            &metrics,
            true,
        )
        .await;

        let Message::Text(text) = write_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(response["result"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn unsubscribe_of_unknown_id_returns_false_not_an_error() {
        let manager = manager();
        let forward = ScriptedForwardRpc::new(vec![]);
        let (write_tx, write_rx) = flume::bounded(8);
        let closing_tx = watch::channel(None::<&'static str>).0;
        let metrics = Metrics::new();

        handle_frame(
            r#"{"jsonrpc":"2.0","id":5,"method":"eth_unsubscribe","params":["0xdeadbeef"]}"#,
            ConnectionId(1),
            &manager,
            forward.as_ref(),
            &write_tx,
            &closing_tx,
            &metrics,
            true,
        )
        .await;

        let Message::Text(text) = write_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(response["id"], serde_json::json!(5));
        assert_eq!(response["result"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn unsubscribe_of_a_non_hex_id_also_returns_false() {
        let manager = manager();
        let forward = ScriptedForwardRpc::new(vec![]);
        let (write_tx, write_rx) = flume::bounded(8);
        let closing_tx = watch::channel(None::<&'static str>).0;
        let metrics = Metrics::new();

        handle_frame(
            r#"{"jsonrpc":"2.0","id":6,"method":"eth_unsubscribe","params":["not-a-hex-id"]}"#,
            ConnectionId(1),
            &manager,
            forward.as_ref(),
            &write_tx,
            &closing_tx,
            &metrics,
            true,
        )
        .await;

        let Message::Text(text) = write_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(response["result"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn unknown_subscription_kind_returns_invalid_params() {
        let manager = manager();
        let forward = ScriptedForwardRpc::new(vec![]);
        let (write_tx, write_rx) = flume::bounded(8);
        let closing_tx = watch::channel(None::<&'static str>).0;
        let metrics = Metrics::new();

        handle_frame(
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["syncing"]}"#,
            ConnectionId(1),
            &manager,
            forward.as_ref(),
            &write_tx,
            &closing_tx,
            &metrics,
            true,
        )
        .await;

        let Message::Text(text) = write_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(response["error"]["code"], serde_json::json!(-32602));
    }

    #[tokio::test]
    async fn other_methods_are_forwarded_when_enabled() {
        let manager = manager();
        let forward = ScriptedForwardRpc::new(vec![Ok(serde_json::json!("0x1"))]);
        let (write_tx, write_rx) = flume::bounded(8);
        let closing_tx = watch::channel(None::<&'static str>).0;
        let metrics = Metrics::new();

        handle_frame(
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":[]}"#,
            ConnectionId(1),
            &manager,
            forward.as_ref(),
            &write_tx,
            &closing_tx,
            &metrics,
            true,
        )
        .await;

        let Message::Text(text) = write_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(response["result"], serde_json::json!("0x1"));
        assert_eq!(forward.call_count(), 1);
    }

    #[tokio::test]
    async fn other_methods_are_rejected_when_disabled() {
        let manager = manager();
        let forward = ScriptedForwardRpc::new(vec![]);
        let (write_tx, write_rx) = flume::bounded(8);
        let closing_tx = watch::channel(None::<&'static str>).0;
        let metrics = Metrics::new();

        handle_frame(
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":[]}"#,
            ConnectionId(1),
            &manager,
            forward.as_ref(),
            &write_tx,
            &closing_tx,
            &metrics,
            false,
        )
        .await;

        let Message::Text(text) = write_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(response["error"].is_object());
        assert_eq!(forward.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_json_returns_invalid_request_with_null_id() {
        let manager = manager();
        let forward = ScriptedForwardRpc::new(vec![]);
        let (write_tx, write_rx) = flume::bounded(8);
        let closing_tx = watch::channel(None::<&'static str>).0;
        let metrics = Metrics::new();

        handle_frame(
            "not json",
            ConnectionId(1),
            &manager,
            forward.as_ref(),
            &write_tx,
            &closing_tx,
            &metrics,
            true,
        )
        .await;

        let Message::Text(text) = write_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let response: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(response["id"], serde_json::json!(null));
        assert_eq!(response["error"]["code"], serde_json::json!(-32600));
    }

    #[test]
    fn teardown_is_idempotent() {
        let manager = manager();
        let metrics = Metrics::new();
        let torn_down = AtomicBool::new(false);

        teardown(ConnectionId(1), &manager, &metrics, &torn_down, "client_close");
        teardown(ConnectionId(1), &manager, &metrics, &torn_down, "client_close");

        assert_eq!(metrics.closed_connections("client_close"), 1);
    }
}
