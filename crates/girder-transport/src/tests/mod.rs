//! Cross-module dispatch tests: whole-pipeline behavior over in-process
//! requests, no sockets involved.

mod pipeline_tests;
mod rpc_dispatch_tests;

use std::sync::Arc;

use bytes::Bytes;
use hyper::{Method, Request, Response};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;

use crate::body::full_body;
use crate::registry::{CallReply, Contract, Handler, MethodDescriptor};
use crate::server::{Server, ServerBuilder, ServerState};
use crate::{BoxBody, pipeline};

pub(crate) fn add_handler() -> Handler {
    Arc::new(|_ctx, req| {
        Box::pin(async move {
            #[derive(serde::Deserialize)]
            struct Params {
                a: i64,
                b: i64,
            }
            let params: Params = serde_json::from_value(req.args)
                .map_err(|e| crate::MethodError::invalid_params(e.to_string()))?;
            Ok(CallReply::Value(json!(params.a + params.b)))
        })
    })
}

pub(crate) fn fail_handler() -> Handler {
    Arc::new(|_ctx, _req| Box::pin(async { Err(crate::MethodError::new("boom")) }))
}

pub(crate) fn sleep_handler(millis: u64) -> Handler {
    Arc::new(move |_ctx, _req| {
        Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
            Ok(CallReply::Value(json!("done")))
        })
    })
}

pub(crate) fn math_contract() -> Contract {
    Contract::new("math")
        .method(MethodDescriptor::new("math", "add", add_handler()))
        .method(MethodDescriptor::new("math", "fail", fail_handler()))
}

pub(crate) fn math_builder() -> ServerBuilder {
    Server::builder().register_jsonrpc(math_contract())
}

pub(crate) fn state_of(server: &Server) -> Arc<ServerState> {
    server.state()
}

pub(crate) async fn send(
    state: &Arc<ServerState>,
    method: Method,
    path: &str,
    headers: &[(&str, &str)],
    body: impl Into<Bytes>,
) -> Response<BoxBody> {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(full_body(body.into())).unwrap();
    pipeline::handle(Arc::clone(state), request).await
}

pub(crate) async fn post_json(
    state: &Arc<ServerState>,
    path: &str,
    body: impl Into<Bytes>,
) -> Response<BoxBody> {
    send(
        state,
        Method::POST,
        path,
        &[("Content-Type", "application/json")],
        body,
    )
    .await
}

pub(crate) async fn body_bytes(response: Response<BoxBody>) -> Bytes {
    use http_body_util::BodyExt;
    response.into_body().collect().await.unwrap().to_bytes()
}

pub(crate) async fn body_json(response: Response<BoxBody>) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

pub(crate) async fn read_stream(mut reader: crate::registry::BodyStream) -> Vec<u8> {
    let mut content = Vec::new();
    reader.read_to_end(&mut content).await.unwrap();
    content
}
