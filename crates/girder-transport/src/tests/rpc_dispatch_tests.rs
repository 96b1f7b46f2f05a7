//! JSON-RPC dispatch: envelope semantics, batches, scheduling, deadlines.

use std::sync::Arc;
use std::time::Duration;

use hyper::{Method, StatusCode};
use serde_json::{Value, json};

use super::*;
use crate::registry::{Contract, MethodDescriptor};

#[tokio::test]
async fn test_single_request_round_trip() {
    // S1: a plain single call on the contract endpoint.
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"{"jsonrpc":"2.0","method":"math.add","params":{"a":1,"b":2},"id":7}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let reply = body_json(response).await;
    assert_eq!(reply, json!({"jsonrpc": "2.0", "result": 3, "id": 7}));
}

#[tokio::test]
async fn test_id_echoed_bit_for_bit() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"{"jsonrpc":"2.0","method":"math.add","params":{"a":1,"b":2},"id":"7"}"#,
    )
    .await;
    let bytes = body_bytes(response).await;
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    // The string id stays a string on the wire.
    assert!(text.contains(r#""id":"7""#), "unexpected reply: {text}");
}

#[tokio::test]
async fn test_method_lookup_is_case_insensitive() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"{"jsonrpc":"2.0","method":"Math.Add","params":{"a":2,"b":3},"id":1}"#,
    )
    .await;
    let reply = body_json(response).await;
    assert_eq!(reply["result"], json!(5));
}

#[tokio::test]
async fn test_notification_error_answers_no_content() {
    // S2: a failing notification still produces 204 and an empty body.
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"{"jsonrpc":"2.0","method":"math.fail","params":null,"id":null}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_batch_with_unknown_method() {
    // S3: one good element, one unknown method.
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"[{"jsonrpc":"2.0","method":"math.add","params":{"a":1,"b":2},"id":1},{"jsonrpc":"2.0","method":"math.nope","id":2}]"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let replies = body_json(response).await;
    let replies = replies.as_array().unwrap();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["result"], json!(3));
    assert_eq!(replies[0]["id"], json!(1));
    assert_eq!(replies[1]["error"]["code"], json!(-32601));
    assert_eq!(replies[1]["id"], json!(2));
}

#[tokio::test]
async fn test_batch_notifications_shrink_reply_array() {
    // Invariant 2: N elements, K notifications, reply length N − K.
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"[{"jsonrpc":"2.0","method":"math.add","params":{"a":1,"b":1}},{"jsonrpc":"2.0","method":"math.add","params":{"a":2,"b":2},"id":9},{"jsonrpc":"2.0","method":"math.add","params":{"a":3,"b":3},"id":null}]"#,
    )
    .await;
    let replies = body_json(response).await;
    let replies = replies.as_array().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["id"], json!(9));
    assert_eq!(replies[0]["result"], json!(4));
}

#[tokio::test]
async fn test_all_notification_batch_is_no_content() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"[{"jsonrpc":"2.0","method":"math.add","params":{"a":1,"b":1}}]"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_empty_batch_is_invalid_request() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(&state, "/math", "[]").await;
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], json!(-32600));
}

#[tokio::test]
async fn test_batch_size_exceeded() {
    let server = math_builder().max_batch_size(2).build().unwrap();
    let state = state_of(&server);
    let element = r#"{"jsonrpc":"2.0","method":"math.add","params":{"a":1,"b":1},"id":1}"#;
    let body = format!("[{element},{element},{element}]");
    let response = post_json(&state, "/math", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = body_bytes(response).await;
    assert_eq!(&bytes[..], b"batch size exceeded");
}

#[tokio::test]
async fn test_garbage_payload_is_parse_error() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(&state, "/math", "plain text").await;
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], json!(-32700));
    assert_eq!(reply["id"], Value::Null);
}

#[tokio::test]
async fn test_bad_version_is_invalid_request() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"{"jsonrpc":"1.0","method":"math.add","id":1}"#,
    )
    .await;
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], json!(-32600));
}

#[tokio::test]
async fn test_bad_params_is_invalid_params() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"{"jsonrpc":"2.0","method":"math.add","params":{"a":"x"},"id":4}"#,
    )
    .await;
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], json!(-32602));
    assert_eq!(reply["id"], json!(4));
}

#[tokio::test]
async fn test_non_post_is_method_not_allowed() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = send(&state, Method::GET, "/math", &[], "").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_global_batch_endpoint() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/",
        r#"{"jsonrpc":"2.0","method":"math.add","params":{"a":4,"b":4},"id":1}"#,
    )
    .await;
    let reply = body_json(response).await;
    assert_eq!(reply["result"], json!(8));
}

#[tokio::test]
async fn test_contract_endpoint_scopes_methods() {
    let other = Contract::new("files").method(MethodDescriptor::new(
        "files",
        "list",
        super::add_handler(),
    ));
    let server = math_builder().register_jsonrpc(other).build().unwrap();
    let state = state_of(&server);
    // files.list is not reachable through /math.
    let response = post_json(
        &state,
        "/math",
        r#"{"jsonrpc":"2.0","method":"files.list","params":{"a":1,"b":1},"id":1}"#,
    )
    .await;
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], json!(-32601));
}

#[tokio::test]
async fn test_direct_dispatch_route() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(&state, "/math/add", r#"{"a":10,"b":5}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
    let reply = body_json(response).await;
    assert_eq!(reply, json!(15));
}

#[tokio::test]
async fn test_sync_header_forces_sequential_execution() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = send(
        &state,
        Method::POST,
        "/math",
        &[("Content-Type", "application/json"), ("X-Sync-On", "true")],
        r#"[{"jsonrpc":"2.0","method":"math.add","params":{"a":1,"b":0},"id":1},{"jsonrpc":"2.0","method":"math.add","params":{"a":2,"b":0},"id":2}]"#,
    )
    .await;
    let replies = body_json(response).await;
    let replies = replies.as_array().unwrap();
    assert_eq!(replies[0]["result"], json!(1));
    assert_eq!(replies[1]["result"], json!(2));
}

#[tokio::test]
async fn test_batch_under_tight_deadline() {
    // Slow handlers under a millisecond write budget. Elements not yet
    // started when the deadline fires answer "request context cancelled"
    // without invoking the handler.
    let slow = Contract::new("slow").method(MethodDescriptor::new(
        "slow",
        "nap",
        sleep_handler(50),
    ));
    let server = Server::builder()
        .register_jsonrpc(slow)
        .write_timeout(Duration::from_millis(10))
        .max_parallel_batch(2)
        .build()
        .unwrap();
    let state = state_of(&server);

    let element = |id: usize| {
        format!(r#"{{"jsonrpc":"2.0","method":"slow.nap","params":null,"id":{id}}}"#)
    };
    let body = format!(
        "[{}]",
        (0..6).map(element).collect::<Vec<_>>().join(",")
    );
    let response = post_json(&state, "/slow", body).await;
    assert_eq!(response.status(), StatusCode::OK);
    let replies = body_json(response).await;
    let replies = replies.as_array().unwrap();
    // Every non-notification element gets exactly one reply, input order.
    assert_eq!(replies.len(), 6);
    for (index, reply) in replies.iter().enumerate() {
        assert_eq!(reply["id"], json!(index));
    }
    let cancelled: Vec<&Value> = replies
        .iter()
        .filter(|r| r["error"]["message"] == json!("request context cancelled"))
        .collect();
    assert!(!cancelled.is_empty(), "expected cancelled entries");
    for reply in cancelled {
        assert_eq!(reply["error"]["code"], json!(-32600));
    }
}

#[tokio::test]
async fn test_batch_results_keep_input_order_across_workers() {
    // Invariant 5: responses land at their submission index for any bound.
    for workers in [1, 3, 10] {
        let server = math_builder().max_parallel_batch(workers).build().unwrap();
        let state = state_of(&server);
        let body = format!(
            "[{}]",
            (0..10)
                .map(|i| format!(
                    r#"{{"jsonrpc":"2.0","method":"math.add","params":{{"a":{i},"b":0}},"id":{i}}}"#
                ))
                .collect::<Vec<_>>()
                .join(",")
        );
        let response = post_json(&state, "/math", body).await;
        let replies = body_json(response).await;
        let replies = replies.as_array().unwrap();
        assert_eq!(replies.len(), 10);
        for (index, reply) in replies.iter().enumerate() {
            assert_eq!(reply["id"], json!(index));
            assert_eq!(reply["result"], json!(index));
        }
    }
}

#[tokio::test]
async fn test_handler_error_carries_code_and_message() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"{"jsonrpc":"2.0","method":"math.fail","id":3}"#,
    )
    .await;
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], json!(-32603));
    assert_eq!(reply["error"]["message"], json!("boom"));
    assert_eq!(reply["id"], json!(3));
}

#[tokio::test]
async fn test_error_handler_hook_remaps_errors() {
    let server = math_builder()
        .error_handler(|err| crate::MethodError::with_code(-32050, err.message))
        .build()
        .unwrap();
    let state = state_of(&server);
    let response = post_json(
        &state,
        "/math",
        r#"{"jsonrpc":"2.0","method":"math.fail","id":1}"#,
    )
    .await;
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], json!(-32050));
}

#[tokio::test]
async fn test_batch_elements_read_headers_from_overlay() {
    // Batch elements share one HTTP envelope; per-method header arguments
    // come from the context overlay.
    let handler: Handler = Arc::new(|ctx, _req| {
        Box::pin(async move {
            let token = ctx
                .overlay()
                .map(|o| o.header("X-Auth").to_string())
                .unwrap_or_default();
            Ok(crate::registry::CallReply::Value(json!(token)))
        })
    });
    let contract =
        Contract::new("auth").method(MethodDescriptor::new("auth", "token", handler));
    let server = Server::builder().register_jsonrpc(contract).build().unwrap();
    let state = state_of(&server);
    let response = send(
        &state,
        Method::POST,
        "/auth",
        &[("Content-Type", "application/json"), ("X-Auth", "abc")],
        r#"[{"jsonrpc":"2.0","method":"auth.token","id":1},{"jsonrpc":"2.0","method":"auth.token","id":2}]"#,
    )
    .await;
    let replies = body_json(response).await;
    let replies = replies.as_array().unwrap();
    assert_eq!(replies[0]["result"], json!("abc"));
    assert_eq!(replies[1]["result"], json!("abc"));
}

#[tokio::test]
async fn test_empty_body_is_parse_error() {
    let server = math_builder().build().unwrap();
    let state = state_of(&server);
    let response = post_json(&state, "/math", "").await;
    let reply = body_json(response).await;
    assert_eq!(reply["error"]["code"], json!(-32700));
}
