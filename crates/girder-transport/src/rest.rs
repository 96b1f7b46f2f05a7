//! REST dispatcher.
//!
//! Every REST method runs the same program: bind path, query, header and
//! cookie arguments (path wins over query over header over cookie, first
//! binding wins), decode the body for verbs that carry one, invoke the
//! middleware-wrapped thunk, then pick the response strategy from the reply
//! shape. Body decode failures answer 400 with a sanitized first line and
//! never leak internal error text.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::{Map, Value};
use tokio_util::io::ReaderStream;

use girder_codec::ContentKind;

use crate::body::{collect_limited, empty_body, full_body, text_response};
use crate::context::CallContext;
use crate::error::MethodError;
use crate::metrics::Protocol;
use crate::multipart;
use crate::registry::{BindSource, CallReply, CallRequest, MethodEntry, StreamPart};
use crate::server::ServerState;
use crate::{BoxBody, overlay::RequestOverlay};

pub async fn dispatch(
    state: &Arc<ServerState>,
    entry: &Arc<MethodEntry>,
    ctx: CallContext,
    req: Request<BoxBody>,
    path_params: Vec<(String, String)>,
) -> Response<BoxBody> {
    let response = run(state, entry, ctx.clone(), req, path_params).await;
    let outcome = if response.status().is_client_error() || response.status().is_server_error() {
        "error"
    } else {
        "ok"
    };
    state
        .metrics
        .requests
        .with_label_values(&[Protocol::Rest.label(), outcome, ctx.client_id()])
        .inc();
    response
}

async fn run(
    state: &Arc<ServerState>,
    entry: &Arc<MethodEntry>,
    ctx: CallContext,
    req: Request<BoxBody>,
    path_params: Vec<(String, String)>,
) -> Response<BoxBody> {
    let desc = &entry.desc;
    let (parts, body) = req.into_parts();

    let query_pairs: Vec<(String, String)> = parts
        .uri
        .query()
        .map(|q| {
            form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default();

    // The request's own snapshot doubles as the cookie parser; the context
    // overlay is the fallback for batch-shared envelopes.
    let local = RequestOverlay::capture(&parts.headers);

    // Body decode, verbs that carry one only.
    let mut args = Map::new();
    let mut streams = Vec::new();
    if matches!(parts.method, Method::POST | Method::PUT | Method::PATCH) {
        if desc.multipart {
            let content_type = parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            match multipart::read_parts(content_type, body, &desc.stream_args).await {
                Ok((decoded, readers)) => {
                    args = decoded;
                    streams = readers;
                }
                Err(err) => return bad_request(&err.to_string()),
            }
        } else if desc.stream_args.len() == 1 {
            // A stream argument wins over any declared request content type.
            let reader = tokio_util::io::StreamReader::new(http_body_util::BodyDataStream::new(
                body,
            ));
            streams.push(Box::new(reader) as crate::registry::BodyStream);
        } else {
            let bytes = match collect_limited(body, state.config.body_limit).await {
                Ok(bytes) => bytes,
                Err(response) => return response,
            };
            if !bytes.is_empty() {
                match decode_body(desc, &bytes) {
                    Ok(Value::Object(map)) => args = map,
                    Ok(other) => {
                        args.insert("body".to_string(), other);
                    }
                    Err(err) => return bad_request(&err.to_string()),
                }
            }
        }
    }

    // Wire bindings override body fields; among themselves the first source
    // to bind an argument wins.
    let mut bound: HashSet<&str> = HashSet::new();
    for source in [
        BindSource::Path,
        BindSource::Query,
        BindSource::Header,
        BindSource::Cookie,
    ] {
        for binding in desc.bindings.iter().filter(|b| b.source == source) {
            if bound.contains(binding.arg.as_str()) {
                continue;
            }
            let raw = match source {
                BindSource::Path => path_params
                    .iter()
                    .find(|(name, _)| *name == binding.wire)
                    .map(|(_, value)| value.clone()),
                BindSource::Query => query_pairs
                    .iter()
                    .find(|(name, _)| *name == binding.wire)
                    .map(|(_, value)| value.clone()),
                BindSource::Header => {
                    non_empty(local.header(&binding.wire)).or_else(|| {
                        ctx.overlay()
                            .and_then(|o| non_empty(o.header(&binding.wire)))
                    })
                }
                BindSource::Cookie => {
                    non_empty(local.cookie(&binding.wire)).or_else(|| {
                        ctx.overlay()
                            .and_then(|o| non_empty(o.cookie(&binding.wire)))
                    })
                }
            };
            let Some(raw) = raw else { continue };
            match binding.kind.convert(&raw) {
                Ok(value) => {
                    args.insert(binding.arg.clone(), value);
                    bound.insert(binding.arg.as_str());
                }
                Err(err) => return bad_request(&err.to_string()),
            }
        }
    }

    let handler = entry.effective();
    let request = CallRequest {
        args: Value::Object(args),
        streams,
    };
    match handler(ctx.clone(), request).await {
        Ok(reply) => {
            if let Some(custom) = &desc.custom_response {
                return match custom(ctx.clone(), reply).await {
                    Ok(response) => response,
                    Err(err) => error_response(state, entry, &ctx, err),
                };
            }
            match reply {
                CallReply::Parts(parts) => {
                    multipart::multipart_response(desc.success, order_parts(entry, parts))
                }
                CallReply::Stream(payload) => {
                    let content_type = desc
                        .stream_results
                        .first()
                        .and_then(|b| b.content_type.clone())
                        .unwrap_or(payload.content_type);
                    stream_response(desc.success, &content_type, payload.reader)
                }
                CallReply::Value(value) => {
                    let shaped = shape_response(entry, value);
                    match desc.response_content.encode_value(&shaped) {
                        Ok(bytes) => Response::builder()
                            .status(desc.success)
                            .header(CONTENT_TYPE, desc.response_content.mime())
                            .body(full_body(Bytes::from(bytes)))
                            .unwrap_or_else(|_| Response::new(empty_body())),
                        Err(err) => {
                            tracing::error!(error = %err, "response encoding failed");
                            error_response(state, entry, &ctx, MethodError::new("internal server error"))
                        }
                    }
                }
                CallReply::Empty => Response::builder()
                    .status(desc.success)
                    .body(empty_body())
                    .unwrap_or_else(|_| Response::new(empty_body())),
            }
        }
        Err(err) => error_response(state, entry, &ctx, err),
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn decode_body(
    desc: &crate::registry::MethodDescriptor,
    bytes: &[u8],
) -> Result<Value, girder_codec::CodecError> {
    match desc.request_content {
        ContentKind::Form => match &desc.form_schema {
            Some(schema) => schema.decode(bytes),
            None => Ok(girder_codec::form::decode_loose(bytes)),
        },
        kind => kind.decode_value(bytes),
    }
}

/// Reorder returned parts to the declared result order and fill in declared
/// content types; undeclared parts keep their relative order at the tail.
fn order_parts(entry: &MethodEntry, mut parts: Vec<StreamPart>) -> Vec<StreamPart> {
    let declared = &entry.desc.stream_results;
    if declared.is_empty() {
        return parts;
    }
    let mut ordered = Vec::with_capacity(parts.len());
    for binding in declared {
        if let Some(position) = parts.iter().position(|p| p.name == binding.part) {
            let mut part = parts.remove(position);
            if part.content_type.is_none() {
                part.content_type = binding.content_type.clone();
            }
            ordered.push(part);
        }
    }
    ordered.extend(parts);
    ordered
}

/// Apply inline-result annotations before encoding.
fn shape_response(entry: &MethodEntry, value: Value) -> Value {
    let results = &entry.desc.results;
    if results.len() == 1 && results[0].inline {
        if let Value::Object(map) = &value {
            if let Some(inner) = map.get(&results[0].name) {
                return inner.clone();
            }
        }
        return value;
    }
    if results.iter().any(|r| r.inline) {
        if let Value::Object(map) = value {
            let mut top = Map::new();
            for (key, inner) in map {
                let inline = results.iter().any(|r| r.inline && r.name == key);
                match (inline, inner) {
                    (true, Value::Object(fields)) => top.extend(fields),
                    (_, other) => {
                        top.insert(key, other);
                    }
                }
            }
            return Value::Object(top);
        }
        return value;
    }
    value
}

fn stream_response(
    status: StatusCode,
    content_type: &str,
    reader: crate::registry::BodyStream,
) -> Response<BoxBody> {
    let stream = ReaderStream::new(reader).map(|r| r.map(http_body::Frame::data));
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(BodyExt::boxed_unsync(StreamBody::new(stream)))
        .unwrap_or_else(|_| Response::new(empty_body()))
}

fn bad_request(message: &str) -> Response<BoxBody> {
    let first_line = message.lines().next().unwrap_or("bad request");
    text_response(StatusCode::BAD_REQUEST, first_line)
}

fn error_response(
    state: &Arc<ServerState>,
    entry: &Arc<MethodEntry>,
    ctx: &CallContext,
    err: MethodError,
) -> Response<BoxBody> {
    let err = match &state.error_handler {
        Some(handler) => handler(err),
        None => err,
    };
    let status = err.http_status();
    state
        .metrics
        .error_responses
        .with_label_values(&[
            entry.protocol.label(),
            &status.as_u16().to_string(),
            ctx.client_id(),
        ])
        .inc();
    let content = entry.desc.response_content;
    let bytes = content
        .encode_value(&err.to_body())
        .unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content.mime())
        .body(full_body(Bytes::from(bytes)))
        .unwrap_or_else(|_| Response::new(empty_body()))
}
