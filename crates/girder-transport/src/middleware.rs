//! Per-contract middleware.
//!
//! A middleware is a function over the invocation thunk: it takes the next
//! implementation and returns a wrapped one. [`wrap_all`] composes a list
//! given in installation order right-to-left, so the first installed wrapper
//! runs outermost. The canonical installation order is Trace, then Metrics,
//! then Log — giving the nesting Trace → Metrics → Log → user.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use tracing::Instrument;

use crate::context::CallContext;
use crate::logger::LogLevel;
use crate::metrics::{Metrics, Protocol};
use crate::registry::{CallRequest, Handler, LogSkip, MethodEntry, Middleware};

/// Which built-in middlewares are enabled server-wide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MiddlewareFlags {
    pub trace: bool,
    pub metrics: bool,
    pub log: bool,
}

/// Compose middlewares given in installation order: the first installed runs
/// outermost, the last installed runs innermost.
pub fn wrap_all(base: Handler, installed: &[Middleware]) -> Handler {
    let mut handler = base;
    for middleware in installed.iter().rev() {
        handler = middleware(handler);
    }
    handler
}

/// Rebuild one entry's effective handler from the current flags.
pub fn apply(entry: &MethodEntry, flags: MiddlewareFlags, metrics: &Arc<Metrics>) {
    let mut installed: Vec<Middleware> = Vec::new();
    if flags.trace {
        installed.push(trace_middleware(&entry.desc.contract, &entry.desc.method));
    }
    if flags.metrics {
        installed.push(metrics_middleware(
            Arc::clone(metrics),
            &entry.desc.contract,
            &entry.desc.method,
            entry.protocol,
        ));
    }
    if flags.log {
        installed.push(log_middleware(
            &entry.desc.contract,
            &entry.desc.method,
            entry.desc.log_skip,
        ));
    }
    entry.set_effective(wrap_all(entry.desc.handler.clone(), &installed));
}

/// Span per call, named `<contract>.<method>`; returned errors are recorded
/// on the span before it closes.
pub fn trace_middleware(contract: &str, method: &str) -> Middleware {
    let name = format!("{contract}.{method}");
    Arc::new(move |next: Handler| {
        let name = name.clone();
        Arc::new(move |ctx: CallContext, req: CallRequest| {
            let span = tracing::info_span!("method_call", name = %name);
            let next = Arc::clone(&next);
            Box::pin(async move {
                let result = next(ctx, req).instrument(span.clone()).await;
                if let Err(err) = &result {
                    span.in_scope(|| tracing::error!(error = %err, "method call failed"));
                }
                result
            })
        })
    })
}

/// Times the call and classifies it as success or failure; the error code
/// comes from the returned error, else the protocol's internal-error code.
pub fn metrics_middleware(
    metrics: Arc<Metrics>,
    service: &str,
    method: &str,
    protocol: Protocol,
) -> Middleware {
    let service = service.to_string();
    let method = method.to_string();
    Arc::new(move |next: Handler| {
        let metrics = Arc::clone(&metrics);
        let service = service.clone();
        let method = method.clone();
        Arc::new(move |ctx: CallContext, req: CallRequest| {
            let metrics = Arc::clone(&metrics);
            let service = service.clone();
            let method = method.clone();
            let next = Arc::clone(&next);
            Box::pin(async move {
                let start = Instant::now();
                let client_id = ctx.client_id().to_string();
                let result = next(ctx, req).await;
                let (success, err_code) = match &result {
                    Ok(_) => ("true", 0),
                    Err(err) => (
                        "false",
                        err.code.unwrap_or(match protocol {
                            Protocol::JsonRpc => girder_jsonrpc::error_codes::INTERNAL_ERROR,
                            Protocol::Rest => 500,
                        }),
                    ),
                };
                let labels = [
                    service.as_str(),
                    method.as_str(),
                    success,
                    &err_code.to_string(),
                    client_id.as_str(),
                ];
                metrics.method_calls.with_label_values(&labels).inc();
                metrics
                    .method_latency
                    .with_label_values(&labels)
                    .observe(start.elapsed().as_secs_f64());
                result
            })
        })
    })
}

/// One structured event per call with `took`, `request`, `response` and
/// `error` on failure. Honors the method's log-skip annotation. Panics pass
/// through unlogged so the recover layer owns their formatting.
pub fn log_middleware(contract: &str, method: &str, skip: LogSkip) -> Middleware {
    let contract = contract.to_string();
    let method = method.to_string();
    Arc::new(move |next: Handler| {
        let contract = contract.clone();
        let method = method.clone();
        Arc::new(move |ctx: CallContext, req: CallRequest| {
            let contract = contract.clone();
            let method = method.clone();
            let next = Arc::clone(&next);
            Box::pin(async move {
                let start = Instant::now();
                let request_snapshot = if skip.request {
                    Value::String("<skipped>".to_string())
                } else {
                    req.args.clone()
                };
                let logger = ctx.logger().clone();
                let result = next(ctx, req).await;
                let took = json!(format!("{:?}", start.elapsed()));
                let contract_field = json!(contract);
                let method_field = json!(method);
                match &result {
                    Ok(reply) => {
                        let response_snapshot = if skip.response {
                            Value::String("<skipped>".to_string())
                        } else {
                            reply.loggable()
                        };
                        logger.log(
                            LogLevel::Info,
                            "method call",
                            &[
                                ("contract", &contract_field),
                                ("method", &method_field),
                                ("took", &took),
                                ("request", &request_snapshot),
                                ("response", &response_snapshot),
                            ],
                        );
                    }
                    Err(err) => {
                        let error_field = json!(err.to_string());
                        logger.log(
                            LogLevel::Error,
                            "method call failed",
                            &[
                                ("contract", &contract_field),
                                ("method", &method_field),
                                ("took", &took),
                                ("request", &request_snapshot),
                                ("error", &error_field),
                            ],
                        );
                    }
                }
                result
            })
        })
    })
}
