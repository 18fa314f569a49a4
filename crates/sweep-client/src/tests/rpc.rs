use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::SweepError;
use crate::event::Event;
use crate::rpc::{
    RpcError, RpcId, RpcMessage, RpcParams, RpcPeer, RpcRequest, RpcResult, CODE_INVALID_PARAMS,
    CODE_INVALID_REQUEST, CODE_METHOD_NOT_FOUND, CODE_PARSE_ERROR,
};

use super::support::{serve_peer_pair, tick};

fn encode(message: &RpcMessage) -> String {
    serde_json::to_string(&message.to_value()).unwrap()
}

#[test]
fn messages_round_trip() {
    let messages = [
        RpcMessage::Request(RpcRequest {
            method: "items_extend".to_string(),
            params: RpcParams::Map(
                json!({"uid": "default", "items": ["a"]})
                    .as_object()
                    .unwrap()
                    .clone(),
            ),
            id: Some(RpcId::Int(3)),
        }),
        RpcMessage::Request(RpcRequest {
            method: "select".to_string(),
            params: RpcParams::List(vec![json!(17)]),
            id: None,
        }),
        RpcMessage::Request(RpcRequest {
            method: "ping".to_string(),
            params: RpcParams::None,
            id: Some(RpcId::Str("x".to_string())),
        }),
        RpcMessage::Result(RpcResult {
            result: json!({"ok": true}),
            id: Some(RpcId::Int(3)),
        }),
        RpcMessage::Error(RpcError::method_not_found(
            Some("missing".to_string()),
            Some(RpcId::Int(4)),
        )),
        RpcMessage::Error(RpcError::internal_error(None, None)),
    ];
    for message in messages {
        let line = encode(&message);
        assert!(!line.contains('\n'));
        assert_eq!(RpcMessage::decode(&line).unwrap(), message);
    }
}

#[test]
fn encode_carries_version_tag_and_decode_does_not_require_it() {
    let message = RpcMessage::Request(RpcRequest {
        method: "ping".to_string(),
        params: RpcParams::None,
        id: Some(RpcId::Int(1)),
    });
    let value: Value = serde_json::from_str(&encode(&message)).unwrap();
    assert_eq!(value.get("jsonrpc"), Some(&json!("2.0")));

    // Inbound frames may omit the tag entirely.
    assert_eq!(
        RpcMessage::decode(r#"{"method":"ping","id":1}"#).unwrap(),
        message
    );
}

#[test]
fn classification_prefers_request_then_error_then_result() {
    let message = RpcMessage::decode(r#"{"error":{"code":1,"message":"m"},"result":5,"id":1}"#);
    assert!(matches!(message, Ok(RpcMessage::Error(_))));

    let message = RpcMessage::decode(r#"{"method":"m","result":5}"#);
    assert!(matches!(message, Ok(RpcMessage::Request(_))));
}

#[test]
fn unclassifiable_input_produces_invalid_request() {
    let err = RpcMessage::decode("not json at all").unwrap_err();
    assert_eq!(err.code, CODE_PARSE_ERROR);

    let err = RpcMessage::decode(r#"{"foo": 1, "id": 7}"#).unwrap_err();
    assert_eq!(err.code, CODE_INVALID_REQUEST);
    assert_eq!(err.id, Some(RpcId::Int(7)));
    assert!(err.data.as_deref().unwrap().contains("foo"));

    let err = RpcMessage::decode("[1, 2]").unwrap_err();
    assert_eq!(err.code, CODE_INVALID_REQUEST);

    // Params of a scalar shape do not form a request.
    let err = RpcMessage::decode(r#"{"method":"m","params":3}"#).unwrap_err();
    assert_eq!(err.code, CODE_INVALID_REQUEST);
}

fn register_arith(peer: &RpcPeer, name: &'static str) {
    peer.register("name", move |_params| async move { Ok(json!(name)) })
        .unwrap();
    peer.register("add", |params: RpcParams| async move {
        let arg = |index, key| {
            params
                .get(index, key)
                .and_then(Value::as_i64)
                .ok_or_else(|| RpcError::invalid_params(Some(format!("missing {key}")), None))
        };
        Ok(json!(arg(0, "a")? + arg(1, "b")?))
    })
    .unwrap();
}

#[tokio::test]
async fn call_reaches_registered_handlers_both_ways() {
    let (a, b) = serve_peer_pair();
    register_arith(&a, "a");
    register_arith(&b, "b");

    assert_eq!(b.call("name", RpcParams::None).await.unwrap(), json!("a"));
    assert_eq!(a.call("name", RpcParams::None).await.unwrap(), json!("b"));
    assert_eq!(
        b.call("add", json!([1, 2])).await.unwrap(),
        json!(3),
        "positional params"
    );
    assert_eq!(
        b.call("add", json!({"a": 1, "b": 2})).await.unwrap(),
        json!(3),
        "named params"
    );
}

#[tokio::test]
async fn unknown_method_and_bad_params_map_to_rpc_errors() {
    let (a, b) = serve_peer_pair();
    register_arith(&a, "a");

    let err = b.call("missing", RpcParams::None).await.unwrap_err();
    match err {
        SweepError::Rpc(err) => {
            assert_eq!(err.code, CODE_METHOD_NOT_FOUND);
            assert_eq!(err.data.as_deref(), Some("missing"));
        }
        other => panic!("expected rpc error, got {other:?}"),
    }

    let err = b.call("add", json!({"a": 1})).await.unwrap_err();
    match err {
        SweepError::Rpc(err) => {
            assert_eq!(err.code, CODE_INVALID_PARAMS);
            // The failing method is named in the data.
            assert!(err.data.as_deref().unwrap().contains("[add]"));
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_handler_does_not_block_other_calls() {
    let (a, b) = serve_peer_pair();
    register_arith(&a, "a");
    a.register("sleep", |_params| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(json!("done"))
    })
    .unwrap();

    let slow = {
        let b = b.clone();
        tokio::spawn(async move { b.call("sleep", RpcParams::None).await })
    };
    // The fast call completes while the slow handler still sleeps.
    assert_eq!(b.call("name", RpcParams::None).await.unwrap(), json!("a"));
    assert_eq!(slow.await.unwrap().unwrap(), json!("done"));
}

#[tokio::test]
async fn notifications_fan_out_without_a_response() {
    let (a, b) = serve_peer_pair();
    let send: Arc<Event<i64>> = Arc::new(Event::new());
    {
        let send = send.clone();
        a.register("send", move |params: RpcParams| {
            let send = send.clone();
            async move {
                let value = params.get(0, "value").and_then(Value::as_i64).unwrap_or(0);
                send.fire(value);
                Ok(json!(value))
            }
        })
        .unwrap();
    }
    let mut stream = a.notifications();

    let fired = send.next();
    b.notify("send", json!([17])).unwrap();
    assert_eq!(fired.await, Some(17));

    // The notification also reaches the stream, with a null id.
    let request = stream.recv().await.unwrap();
    assert_eq!(request.method, "send");
    assert_eq!(request.params, RpcParams::List(vec![json!(17)]));
    assert_eq!(request.id, None);

    // A handler-less notification still reaches the stream and never
    // produces a method-not-found response.
    b.notify("other", json!({"arg": "something"})).unwrap();
    let request = stream.recv().await.unwrap();
    assert_eq!(request.method, "other");

    // The peer stays healthy: no stray error arrived on either side.
    assert_eq!(b.call("send", json!([1])).await.unwrap(), json!(1));
}

#[tokio::test]
async fn termination_resolves_pending_calls() {
    let (a, b) = serve_peer_pair();
    a.register("hang", |_params| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Value::Null)
    })
    .unwrap();

    let pending = {
        let b = b.clone();
        tokio::spawn(async move { b.call("hang", RpcParams::None).await })
    };
    tick().await;

    // Terminating the serving side closes the transport; the caller's
    // pending slot resolves in finite time.
    a.terminate();
    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("pending call must resolve")
        .unwrap();
    assert!(matches!(result, Err(SweepError::Terminated)));

    tick().await;
    assert!(b.is_terminated());
    assert!(matches!(
        b.call("name", RpcParams::None).await,
        Err(SweepError::Terminated)
    ));
    assert!(matches!(b.notify("x", RpcParams::None), Err(SweepError::Terminated)));
}

#[tokio::test]
async fn terminate_is_idempotent_and_ends_the_notification_stream() {
    let (a, _b) = serve_peer_pair();
    let mut stream = a.notifications();
    a.terminate();
    a.terminate();
    assert_eq!(stream.recv().await, None);
    assert!(a.is_terminated());
}

#[tokio::test]
async fn call_forget_responses_are_dropped_silently() {
    let (a, b) = serve_peer_pair();
    register_arith(&a, "a");

    b.call_forget("name", RpcParams::None).unwrap();
    tick().await;
    // The response to the forgotten id was dropped; the peer still works.
    assert_eq!(b.call("name", RpcParams::None).await.unwrap(), json!("a"));
}
