//! Contract wiring for the demo service, shaped like generator output: one
//! JSON-RPC contract (`arith`) and one REST contract (`files`), registered
//! against the girder runtime.

use std::sync::Arc;

use hyper::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use girder_codec::{ScalarKind, ValueKind};
use girder_transport::{
    ArgBinding, CallReply, Contract, Handler, MethodDescriptor, MethodError, Server,
    ServerBuilder, StreamBinding, StreamPayload,
};

#[derive(Debug, Deserialize)]
struct AddParams {
    a: i64,
    b: i64,
}

fn add() -> Handler {
    Arc::new(|_ctx, req| {
        Box::pin(async move {
            let params: AddParams = serde_json::from_value(req.args)
                .map_err(|e| MethodError::invalid_params(e.to_string()))?;
            Ok(CallReply::Value(json!(params.a + params.b)))
        })
    })
}

fn fail() -> Handler {
    Arc::new(|_ctx, _req| Box::pin(async { Err(MethodError::new("boom")) }))
}

/// The JSON-RPC contract: `arith.add` and `arith.fail`.
pub fn arith_contract() -> Contract {
    Contract::new("arith")
        .method(MethodDescriptor::new("arith", "add", add()))
        .method(MethodDescriptor::new("arith", "fail", fail()))
}

fn whoami() -> Handler {
    Arc::new(|_ctx, req| {
        Box::pin(async move {
            let token = req.args["authToken"].as_str().unwrap_or_default().to_string();
            Ok(CallReply::Value(json!({"token": token})))
        })
    })
}

fn export() -> Handler {
    Arc::new(|_ctx, req| {
        Box::pin(async move {
            let id = req.args["id"].as_i64().unwrap_or_default();
            let payload = format!("export #{id}\n").repeat(64);
            Ok(CallReply::Stream(StreamPayload::octet_stream(Box::new(
                std::io::Cursor::new(payload.into_bytes()),
            ))))
        })
    })
}

/// The REST contract: a header-bound echo and a streaming download.
pub fn files_contract() -> Contract {
    Contract::new("files")
        .method(
            MethodDescriptor::new("files", "whoami", whoami())
                .route(Method::GET, "/whoami")
                .binding(ArgBinding::header(
                    "authToken",
                    "X-Auth",
                    ValueKind::Scalar(ScalarKind::String),
                )),
        )
        .method(
            MethodDescriptor::new("files", "export", export())
                .route(Method::GET, "/export/:id")
                .binding(ArgBinding::path("id", ValueKind::Scalar(ScalarKind::Int)))
                .stream_result(StreamBinding::new("export", "export"))
                .success(StatusCode::OK),
        )
}

/// Assemble the demo server with both contracts installed.
pub fn builder() -> ServerBuilder {
    Server::builder()
        .register_jsonrpc(arith_contract())
        .register_rest(files_contract())
}
