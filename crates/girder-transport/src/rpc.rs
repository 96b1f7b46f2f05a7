//! JSON-RPC 2.0 dispatcher.
//!
//! Strict 2.0 semantics: POST only, payload shape sniffed from the first
//! significant byte, per-element version validation, pre-lowercased method
//! registry, notifications never answered. A batch runs on the bounded
//! scheduler under the shared write-timeout deadline unless `X-Sync-On: true`
//! forces sequential execution.

use std::sync::Arc;

use bytes::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Request, Response, StatusCode};
use serde_json::Value;
use serde_json::value::RawValue;

use girder_jsonrpc::{ErrorObject, PayloadShape, RpcReply, RpcRequest, sniff_payload};

use crate::BoxBody;
use crate::batch;
use crate::body::{collect_limited, empty_body, full_body, text_response};
use crate::context::CallContext;
use crate::registry::CallRequest;
use crate::server::ServerState;

/// Entry-outcome labels on the incoming-requests counter.
mod outcome {
    pub const OK: &str = "ok";
    pub const ERROR: &str = "error";
    pub const PARSE_ERROR: &str = "parse_error";
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const METHOD_NOT_FOUND: &str = "method_not_found";
    pub const EMPTY_BODY: &str = "empty_body";
    pub const BATCH_SIZE_EXCEEDED: &str = "batch_size_exceeded";
    pub const METHOD_NOT_ALLOWED: &str = "method_not_allowed";
}

fn count(state: &ServerState, label: &str, client_id: &str) {
    state
        .metrics
        .requests
        .with_label_values(&["jsonrpc", label, client_id])
        .inc();
}

/// Count a request that reached a JSON-RPC route with the wrong verb.
pub fn count_method_not_allowed(state: &ServerState, client_id: &str) {
    count(state, outcome::METHOD_NOT_ALLOWED, client_id);
}

/// Handle the batch endpoint: a single object or an array of requests.
/// `scope` restricts method lookup to one contract (its own endpoint); the
/// global endpoint passes `None`.
pub async fn dispatch_batch(
    state: &Arc<ServerState>,
    scope: Option<String>,
    ctx: CallContext,
    req: Request<BoxBody>,
) -> Response<BoxBody> {
    let sync = req
        .headers()
        .get("X-Sync-On")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let bytes = match collect_limited(req.into_body(), state.config.body_limit).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        count(state, outcome::EMPTY_BODY, ctx.client_id());
        return reply_json(single_error(None, ErrorObject::parse_error(None)));
    }

    match sniff_payload(&bytes) {
        Some(PayloadShape::Single) => {
            let request: RpcRequest = match serde_json::from_slice(&bytes) {
                Ok(request) => request,
                Err(_) => {
                    count(state, outcome::PARSE_ERROR, ctx.client_id());
                    return reply_json(single_error(None, ErrorObject::parse_error(None)));
                }
            };
            match run_single(state, scope.as_deref(), ctx, request).await {
                Some(reply) => reply_json(reply),
                None => no_content(),
            }
        }
        Some(PayloadShape::Batch) => {
            let elements: Vec<Box<RawValue>> = match serde_json::from_slice(&bytes) {
                Ok(elements) => elements,
                Err(_) => {
                    count(state, outcome::PARSE_ERROR, ctx.client_id());
                    return reply_json(single_error(None, ErrorObject::parse_error(None)));
                }
            };
            if elements.is_empty() {
                count(state, outcome::INVALID_REQUEST, ctx.client_id());
                return reply_json(single_error(None, ErrorObject::invalid_request(None)));
            }
            if elements.len() > state.config.max_batch_size {
                count(state, outcome::BATCH_SIZE_EXCEEDED, ctx.client_id());
                return text_response(StatusCode::BAD_REQUEST, "batch size exceeded");
            }
            state.metrics.batch_size.observe(elements.len() as f64);

            // Shared deadline for every element, derived from the write
            // budget when one is configured.
            let batch_ctx = if state.config.write_timeout > std::time::Duration::ZERO {
                ctx.with_deadline(state.config.write_timeout)
            } else {
                ctx.clone()
            };

            let replies = if sync {
                let mut replies = Vec::with_capacity(elements.len());
                for element in &elements {
                    let request = parse_element(state, &batch_ctx, element);
                    let reply = match request {
                        Ok(request) => {
                            run_single(state, scope.as_deref(), batch_ctx.clone(), request).await
                        }
                        Err(reply) => reply,
                    };
                    replies.push(reply);
                }
                replies
            } else {
                let elements = Arc::new(elements);
                let runner: batch::ElementRunner = {
                    let state = Arc::clone(state);
                    let scope = scope.clone();
                    let batch_ctx = batch_ctx.clone();
                    let elements = Arc::clone(&elements);
                    Arc::new(move |index| {
                        let state = Arc::clone(&state);
                        let scope = scope.clone();
                        let ctx = batch_ctx.clone();
                        let elements = Arc::clone(&elements);
                        Box::pin(async move {
                            match parse_element(&state, &ctx, &elements[index]) {
                                Ok(request) => {
                                    run_single(&state, scope.as_deref(), ctx, request).await
                                }
                                Err(reply) => reply,
                            }
                        })
                    })
                };
                batch::run(elements.len(), state.config.max_parallel_batch, runner).await
            };

            let replies: Vec<RpcReply> = replies.into_iter().flatten().collect();
            if replies.is_empty() {
                no_content()
            } else {
                reply_json(replies)
            }
        }
        None => {
            count(state, outcome::PARSE_ERROR, ctx.client_id());
            reply_json(single_error(None, ErrorObject::parse_error(None)))
        }
    }
}

/// Direct dispatch: the method name comes from the route, the body is the
/// raw params payload, and the reply is the bare result (or error object)
/// rather than a full envelope.
pub async fn dispatch_direct(
    state: &Arc<ServerState>,
    contract: &str,
    method: &str,
    ctx: CallContext,
    req: Request<BoxBody>,
) -> Response<BoxBody> {
    let key = if method.contains('.') {
        method.to_lowercase()
    } else {
        format!("{contract}.{method}").to_lowercase()
    };
    let Some(entry) = state.registry.lookup_rpc(&key, None) else {
        count(state, outcome::METHOD_NOT_FOUND, ctx.client_id());
        return json_error_response(StatusCode::NOT_FOUND, ErrorObject::method_not_found(&key));
    };

    let bytes = match collect_limited(req.into_body(), state.config.body_limit).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };
    let params = if bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(_) => {
                count(state, outcome::PARSE_ERROR, ctx.client_id());
                return json_error_response(
                    StatusCode::BAD_REQUEST,
                    ErrorObject::parse_error(None),
                );
            }
        }
    };

    let handler = entry.effective();
    match handler(ctx.clone(), CallRequest::from_args(params)).await {
        Ok(reply) => {
            count(state, outcome::OK, ctx.client_id());
            reply_json(reply.into_value())
        }
        Err(err) => {
            let err = match &state.error_handler {
                Some(handler) => handler(err),
                None => err,
            };
            count(state, outcome::ERROR, ctx.client_id());
            let status = err.http_status();
            state
                .metrics
                .error_responses
                .with_label_values(&["jsonrpc", &status.as_u16().to_string(), ctx.client_id()])
                .inc();
            json_error_response(status, err.to_error_object())
        }
    }
}

/// Parse one batch element. A malformed element becomes an invalid-request
/// reply (with a null id, since the id never materialized).
fn parse_element(
    state: &ServerState,
    ctx: &CallContext,
    element: &RawValue,
) -> Result<RpcRequest, Option<RpcReply>> {
    match serde_json::from_str::<RpcRequest>(element.get()) {
        Ok(request) => Ok(request),
        Err(_) => {
            count(state, outcome::INVALID_REQUEST, ctx.client_id());
            Err(Some(RpcReply::error(
                None,
                ErrorObject::invalid_request(None),
            )))
        }
    }
}

/// Execute one request end to end. `None` means no response entry: the
/// request was a notification, whatever its outcome.
pub async fn run_single(
    state: &Arc<ServerState>,
    scope: Option<&str>,
    ctx: CallContext,
    request: RpcRequest,
) -> Option<RpcReply> {
    let notification = request.is_notification();
    let reply_id = request.reply_id();

    // The deadline is checked first; a cancelled element never reaches
    // validation or the handler.
    if ctx.is_cancelled() {
        count(state, outcome::INVALID_REQUEST, ctx.client_id());
        return answer(
            notification,
            reply_id,
            Err(ErrorObject::invalid_request(Some(
                "request context cancelled".to_string(),
            ))),
        );
    }

    if let Err(error) = request.validate() {
        count(state, outcome::INVALID_REQUEST, ctx.client_id());
        return answer(notification, reply_id, Err(error));
    }
    // validate() guarantees the method is present
    let method = request.method.as_deref().unwrap_or_default().to_lowercase();

    let Some(entry) = state.registry.lookup_rpc(&method, scope) else {
        count(state, outcome::METHOD_NOT_FOUND, ctx.client_id());
        return answer(
            notification,
            reply_id,
            Err(ErrorObject::method_not_found(&method)),
        );
    };

    let params = request
        .params
        .as_ref()
        .and_then(|raw| serde_json::from_str(raw.get()).ok())
        .unwrap_or(Value::Null);

    let handler = entry.effective();
    match handler(ctx.clone(), CallRequest::from_args(params)).await {
        Ok(reply) => {
            count(state, outcome::OK, ctx.client_id());
            if notification {
                None
            } else {
                reply_id.map(|id| RpcReply::result(id, reply.into_value()))
            }
        }
        Err(err) => {
            let err = match &state.error_handler {
                Some(handler) => handler(err),
                None => err,
            };
            count(state, outcome::ERROR, ctx.client_id());
            answer(notification, reply_id, Err(err.to_error_object()))
        }
    }
}

fn answer(
    notification: bool,
    reply_id: Option<girder_jsonrpc::RequestId>,
    outcome: Result<Value, ErrorObject>,
) -> Option<RpcReply> {
    if notification {
        return None;
    }
    Some(match outcome {
        Ok(value) => RpcReply::result(reply_id?, value),
        Err(error) => RpcReply::error(reply_id, error),
    })
}

fn single_error(id: Option<girder_jsonrpc::RequestId>, error: ErrorObject) -> RpcReply {
    RpcReply::error(id, error)
}

fn reply_json<T: serde::Serialize>(payload: T) -> Response<BoxBody> {
    match serde_json::to_vec(&payload) {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(full_body(Bytes::from(bytes)))
            .unwrap_or_else(|_| Response::new(empty_body())),
        Err(_) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(empty_body())
            .unwrap_or_else(|_| Response::new(empty_body())),
    }
}

fn json_error_response(status: StatusCode, error: ErrorObject) -> Response<BoxBody> {
    match serde_json::to_vec(&error) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(full_body(Bytes::from(bytes)))
            .unwrap_or_else(|_| Response::new(empty_body())),
        Err(_) => text_response(status, "internal server error"),
    }
}

fn no_content() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(empty_body())
        .unwrap_or_else(|_| Response::new(empty_body()))
}
