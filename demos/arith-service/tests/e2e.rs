//! End-to-end tests over a real socket: the demo service bound to an
//! ephemeral port, driven by an HTTP client.

use serde_json::{Value, json};

use girder_transport::Server;

async fn start() -> (Server, String) {
    let server = arith_service::builder().build().unwrap();
    let addr = server
        .serve("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    (server, format!("http://{addr}"))
}

#[tokio::test]
async fn test_jsonrpc_single_call() {
    let (server, base) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/arith"))
        .json(&json!({"jsonrpc": "2.0", "method": "arith.add", "params": {"a": 1, "b": 2}, "id": 7}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let reply: Value = response.json().await.unwrap();
    assert_eq!(reply, json!({"jsonrpc": "2.0", "result": 3, "id": 7}));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_jsonrpc_notification_error_is_no_content() {
    let (server, base) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/arith"))
        .json(&json!({"jsonrpc": "2.0", "method": "arith.fail", "params": null, "id": null}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert!(response.bytes().await.unwrap().is_empty());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_jsonrpc_batch_with_unknown_method() {
    let (server, base) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/arith"))
        .json(&json!([
            {"jsonrpc": "2.0", "method": "arith.add", "params": {"a": 1, "b": 2}, "id": 1},
            {"jsonrpc": "2.0", "method": "arith.nope", "id": 2},
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let replies: Value = response.json().await.unwrap();
    let replies = replies.as_array().unwrap();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["result"], json!(3));
    assert_eq!(replies[0]["id"], json!(1));
    assert_eq!(replies[1]["error"]["code"], json!(-32601));
    assert_eq!(replies[1]["id"], json!(2));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rest_header_bound_argument() {
    let (server, base) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/whoami"))
        .header("X-Auth", "abc")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let reply: Value = response.json().await.unwrap();
    assert_eq!(reply["token"], json!("abc"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rest_streaming_download() {
    let (server, base) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/export/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/octet-stream"
    );
    let bytes = response.bytes().await.unwrap();
    assert!(bytes.starts_with(b"export #1"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_health_and_metrics_apps() {
    let (server, base) = start().await;
    let health_addr = server
        .serve_health("/healthz", "127.0.0.1:0".parse().unwrap(), &json!({"status": "ok"}))
        .await
        .unwrap();
    let metrics_addr = server
        .serve_metrics("/metrics", "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let client = reqwest::Client::new();

    // Touch the main app so the counters move.
    client
        .post(format!("{base}/arith"))
        .json(&json!({"jsonrpc": "2.0", "method": "arith.add", "params": {"a": 1, "b": 1}, "id": 1}))
        .send()
        .await
        .unwrap();

    let health: Value = client
        .get(format!("http://{health_addr}/healthz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "ok"}));

    let metrics = client
        .get(format!("http://{metrics_addr}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("requests_total"));
    assert!(metrics.contains("service_version"));

    server.shutdown().await.unwrap();
}
