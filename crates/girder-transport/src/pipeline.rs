//! Per-request pipeline.
//!
//! A fixed, ordered chain applied to every request before protocol dispatch:
//! recover, client-id tagging, in-flight gauge, duration histogram, request
//! overlay (only when JSON-RPC contracts exist), server span, per-request
//! logger binding, header handlers. Recovery is outermost: everything from
//! the overlay on runs inside the caught future, and the gauge/histogram
//! closures are drop guards so they observe even while unwinding.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::body::{internal_error_response, text_response};
use crate::context::CallContext;
use crate::cors::CorsLayer;
use crate::logger::{LogLevel, RequestLogger};
use crate::metrics::Metrics;
use crate::overlay::RequestOverlay;
use crate::router::{RouteOutcome, RouteTarget};
use crate::server::ServerState;
use crate::{BoxBody, rest, rpc};

struct InFlightGuard {
    metrics: Arc<Metrics>,
    path: String,
    client_id: String,
}

impl InFlightGuard {
    fn new(metrics: Arc<Metrics>, path: String, client_id: String) -> Self {
        metrics.in_flight.with_label_values(&[&path, &client_id]).inc();
        Self {
            metrics,
            path,
            client_id,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics
            .in_flight
            .with_label_values(&[&self.path, &self.client_id])
            .dec();
    }
}

struct DurationGuard {
    metrics: Arc<Metrics>,
    client_id: String,
    start: Instant,
}

impl DurationGuard {
    fn new(metrics: Arc<Metrics>, client_id: String) -> Self {
        Self {
            metrics,
            client_id,
            start: Instant::now(),
        }
    }
}

impl Drop for DurationGuard {
    fn drop(&mut self) {
        self.metrics
            .duration
            .with_label_values(&[&self.client_id])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

/// The per-request entry point the connection service calls.
pub async fn handle(state: Arc<ServerState>, req: Request<BoxBody>) -> Response<BoxBody> {
    let client_id = req
        .headers()
        .get(&state.config.client_id_header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string();
    let path = req.uri().path().to_string();

    let _in_flight = InFlightGuard::new(Arc::clone(&state.metrics), path.clone(), client_id.clone());
    let _duration = DurationGuard::new(Arc::clone(&state.metrics), client_id.clone());

    let protected = enrich_and_dispatch(Arc::clone(&state), client_id, path, req);
    let caught = if state.trace_enabled() {
        let span = tracing::info_span!("request", server = %format!("girder:{}", crate::VERSION));
        AssertUnwindSafe(protected.instrument(span)).catch_unwind().await
    } else {
        AssertUnwindSafe(protected).catch_unwind().await
    };

    let mut response = match caught {
        Ok(response) => response,
        Err(panic) => {
            state.metrics.panics.inc();
            tracing::error!(panic = panic_message(&panic), "recovered panic in handler");
            internal_error_response()
        }
    };

    if state.config.enable_cors {
        CorsLayer::apply_cors_headers(response.headers_mut());
    }
    response
}

/// Everything past the recover layer: overlay capture, logger binding,
/// header handlers, then protocol dispatch.
async fn enrich_and_dispatch(
    state: Arc<ServerState>,
    client_id: String,
    path: String,
    mut req: Request<BoxBody>,
) -> Response<BoxBody> {
    // Only JSON-RPC batches need the envelope snapshot.
    let overlay = state
        .registry
        .has_rpc()
        .then(|| RequestOverlay::capture(req.headers()));

    let level = req
        .headers()
        .get("X-Log-Level")
        .and_then(|v| v.to_str().ok())
        .and_then(LogLevel::parse)
        .unwrap_or_default();
    let mut logger = RequestLogger::with_level(level);

    let mut response_injections: Vec<(String, String)> = Vec::new();
    for (name, handler) in state.header_handlers.iter() {
        let current = req
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let advice = handler(&current);
        if let Some(value) = advice.request_value {
            if let (Ok(header_name), Ok(header_value)) = (
                HeaderName::try_from(name.to_string()),
                HeaderValue::from_str(&value),
            ) {
                req.headers_mut().insert(header_name, header_value);
            }
        }
        if let Some(value) = advice.response_value {
            response_injections.push((name.to_string(), value));
        }
        if let Some((field, value)) = advice.log_field {
            logger.push_field(field, value);
        }
    }

    let ctx = CallContext::new(client_id, path, overlay, logger, CancellationToken::new());
    let mut response = dispatch(state, ctx, req).await;

    for (name, value) in response_injections {
        if let (Ok(header_name), Ok(header_value)) =
            (HeaderName::try_from(name), HeaderValue::from_str(&value))
        {
            response.headers_mut().insert(header_name, header_value);
        }
    }
    response
}

async fn dispatch(
    state: Arc<ServerState>,
    ctx: CallContext,
    req: Request<BoxBody>,
) -> Response<BoxBody> {
    let verb = req.method().clone();
    let path = req.uri().path().to_string();
    match state.router.resolve(&verb, &path) {
        RouteOutcome::Matched { target, params } => match target {
            RouteTarget::Rest(entry) => rest::dispatch(&state, &entry, ctx, req, params).await,
            RouteTarget::RpcBatch(scope) => rpc::dispatch_batch(&state, scope, ctx, req).await,
            RouteTarget::RpcDirect { contract } => {
                let method = params
                    .iter()
                    .find(|(name, _)| name == "method")
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default();
                rpc::dispatch_direct(&state, &contract, &method, ctx, req).await
            }
        },
        RouteOutcome::WrongVerb { rpc: is_rpc } => {
            if is_rpc {
                rpc::count_method_not_allowed(&state, ctx.client_id());
            }
            text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        RouteOutcome::NotFound => match &state.fallback {
            Some(fallback) => fallback(req).await,
            None => text_response(StatusCode::NOT_FOUND, "not found"),
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.as_str()
    } else {
        "unknown panic payload"
    }
}
