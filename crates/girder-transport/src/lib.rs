//! # girder transport
//!
//! The HTTP core every generated service links against. One listener serves
//! two protocols: REST routes installed per method, and JSON-RPC 2.0 (single
//! and batched) on per-contract and global endpoints. Around the dispatchers
//! sit a fixed request pipeline (recover, client-id tagging, gauges, request
//! overlay, logger binding, header handlers), a per-contract middleware stack
//! (trace, metrics, log), content codecs, and Prometheus-style observability
//! served from independent apps.
//!
//! Generated code interacts with this crate through two surfaces: the
//! [`ServerBuilder`] (configuration, contract registration, header/error
//! hooks) and the [`registry`] types (method descriptors and invocation
//! thunks).

pub mod batch;
pub mod body;
pub mod config;
pub mod context;
pub mod cors;
pub mod error;
pub mod headers;
pub mod logger;
pub mod metrics;
pub mod middleware;
pub mod multipart;
pub mod overlay;
pub mod pipeline;
pub mod registry;
pub mod rest;
pub mod router;
pub mod rpc;
pub mod server;

#[cfg(test)]
mod tests;

// Re-export main types
pub use body::{BoxBody, empty_body, full_body, internal_error_response, text_response};
pub use config::ServerConfig;
pub use context::CallContext;
pub use cors::CorsLayer;
pub use error::{ErrorCode, ErrorHandler, MethodError};
pub use headers::{HeaderAdvice, HeaderHandler, HeaderHandlers};
pub use logger::{LogLevel, RequestLogger, init_tracing};
pub use metrics::{Metrics, Protocol};
pub use middleware::MiddlewareFlags;
pub use overlay::RequestOverlay;
pub use registry::{
    ArgBinding, BindSource, BodyStream, CallReply, CallRequest, Contract, ContractRegistry,
    CustomResponder, Handler, HandlerFuture, LogSkip, MethodDescriptor, Middleware, ResultField,
    StreamBinding, StreamPart, StreamPayload,
};
pub use server::{FallbackHandler, SHUTDOWN_BUDGET, Server, ServerBuilder, ServerState};

// Re-export foundational crates the generated bindings build on
pub use girder_codec as codec;
pub use girder_jsonrpc as jsonrpc;

/// Crate version baked into the version gauge and the server span name.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport-level errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("codec error: {0}")]
    Codec(#[from] girder_codec::CodecError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("shutdown deadline exceeded")]
    ShutdownTimeout,
}
