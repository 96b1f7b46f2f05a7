//! Transport server: listener lifecycle, option application, route
//! installation, and the independent health/metrics apps.
//!
//! Construction is strictly phased: configuration setters run first, then the
//! engine state is assembled, then contract registrations install routes.
//! Middleware enables (`with_log` / `with_trace` / `with_metrics`) rebuild
//! every registered method's effective handler and may run before or after
//! serving starts.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use hyper::header::CONTENT_TYPE;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::body::{empty_body, full_body, text_response};
use crate::config::ServerConfig;
use crate::context::CallContext;
use crate::error::ErrorHandler;
use crate::headers::{HeaderAdvice, HeaderHandlers};
use crate::metrics::Metrics;
use crate::middleware::{self, MiddlewareFlags};
use crate::error::MethodError;
use crate::registry::{CallReply, Contract, ContractRegistry};
use crate::router::{RouteTarget, Router};
use crate::{BoxBody, Result, pipeline};

/// Graceful stop budget shared by every owned server.
pub const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

/// Handler for routes nothing else matched, the escape hatch for advanced
/// composition on the same listener.
pub type FallbackHandler =
    Arc<dyn Fn(Request<BoxBody>) -> BoxFuture<'static, Response<BoxBody>> + Send + Sync>;

type AppService = Arc<dyn Fn(Request<BoxBody>) -> BoxFuture<'static, Response<BoxBody>> + Send + Sync>;

/// Everything the pipeline and dispatchers read per request. Built once;
/// only middleware flags (and the effective handlers they drive) mutate
/// afterwards, behind their own locks.
pub struct ServerState {
    pub config: ServerConfig,
    pub registry: ContractRegistry,
    pub router: Router,
    pub metrics: Arc<Metrics>,
    pub header_handlers: HeaderHandlers,
    pub error_handler: Option<ErrorHandler>,
    pub fallback: Option<FallbackHandler>,
    flags: RwLock<MiddlewareFlags>,
}

impl ServerState {
    pub fn flags(&self) -> MiddlewareFlags {
        self.flags.read().map(|f| *f).unwrap_or_default()
    }

    pub fn trace_enabled(&self) -> bool {
        self.flags().trace
    }

    fn enable(&self, update: impl FnOnce(&mut MiddlewareFlags)) {
        if let Ok(mut flags) = self.flags.write() {
            update(&mut flags);
        }
        self.rebuild_handlers();
    }

    fn rebuild_handlers(&self) {
        let flags = self.flags();
        for entry in self.registry.entries() {
            middleware::apply(entry, flags, &self.metrics);
        }
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

/// Builder for the transport server.
pub struct ServerBuilder {
    config: ServerConfig,
    rest: Vec<Contract>,
    rpc: Vec<Contract>,
    header_handlers: HeaderHandlers,
    error_handler: Option<ErrorHandler>,
    fallback: Option<FallbackHandler>,
    flags: MiddlewareFlags,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            rest: Vec::new(),
            rpc: Vec::new(),
            header_handlers: HeaderHandlers::default(),
            error_handler: None,
            fallback: None,
            flags: MiddlewareFlags::default(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.config.body_limit = bytes;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.config.concurrency = limit;
        self
    }

    pub fn max_batch_size(mut self, limit: usize) -> Self {
        self.config.max_batch_size = limit;
        self
    }

    pub fn max_parallel_batch(mut self, workers: usize) -> Self {
        self.config.max_parallel_batch = workers;
        self
    }

    pub fn client_id_header(mut self, header: impl Into<String>) -> Self {
        self.config.client_id_header = header.into();
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    /// Register a JSON-RPC contract: batch endpoint at `/{contract}`, direct
    /// dispatch at `/{contract}/{method}`.
    pub fn register_jsonrpc(mut self, contract: Contract) -> Self {
        self.rpc.push(contract);
        self
    }

    /// Register a REST contract: one route per method under its declared
    /// verb and path template.
    pub fn register_rest(mut self, contract: Contract) -> Self {
        self.rest.push(contract);
        self
    }

    pub fn header_handler<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&str) -> HeaderAdvice + Send + Sync + 'static,
    {
        self.header_handlers.insert(name, handler);
        self
    }

    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(MethodError) -> MethodError + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn fallback(mut self, handler: FallbackHandler) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn with_log(mut self) -> Self {
        self.flags.log = true;
        self
    }

    pub fn with_trace(mut self) -> Self {
        self.flags.trace = true;
        self
    }

    pub fn with_metrics(mut self) -> Self {
        self.flags.metrics = true;
        self
    }

    /// Assemble the server: configuration is final, the engine state is
    /// built, then contracts install their routes deterministically.
    pub fn build(self) -> Result<Server> {
        let metrics = Arc::new(Metrics::new()?);
        metrics.set_version(crate::VERSION);

        let mut registry = ContractRegistry::default();
        let mut router = Router::default();

        let rpc_names: Vec<String> = self.rpc.iter().map(|c| c.name.clone()).collect();
        for contract in self.rpc {
            registry.register_rpc(contract);
        }
        for contract in self.rest {
            registry.register_rest(contract);
        }

        for entry in registry.rest_entries() {
            router.add(
                entry.desc.verb.clone(),
                &self.config.prefixed(&entry.desc.path),
                RouteTarget::Rest(Arc::clone(entry)),
            );
        }
        for name in &rpc_names {
            let scope = name.to_lowercase();
            router.add(
                Method::POST,
                &self.config.prefixed(name),
                RouteTarget::RpcBatch(Some(scope.clone())),
            );
            router.add(
                Method::POST,
                &self.config.prefixed(&format!("{name}/:method")),
                RouteTarget::RpcDirect { contract: scope },
            );
        }
        if registry.has_rpc() {
            router.add(Method::POST, "/", RouteTarget::RpcBatch(None));
        }

        let state = Arc::new(ServerState {
            config: self.config,
            registry,
            router,
            metrics,
            header_handlers: self.header_handlers,
            error_handler: self.error_handler,
            fallback: self.fallback,
            flags: RwLock::new(self.flags),
        });
        state.rebuild_handlers();

        Ok(Server {
            state,
            shutdown: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The transport server. Owns the engine state, every accept loop it
/// spawned, and the shutdown token they all watch.
pub struct Server {
    state: Arc<ServerState>,
    shutdown: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Enable the logging middleware on every registered handler.
    pub fn with_log(&self) {
        self.state.enable(|flags| flags.log = true);
    }

    /// Enable the tracing middleware on every registered handler.
    pub fn with_trace(&self) {
        self.state.enable(|flags| flags.trace = true);
    }

    /// Enable the metrics middleware on every registered handler.
    pub fn with_metrics(&self) {
        self.state.enable(|flags| flags.metrics = true);
    }

    /// Invoke a registered JSON-RPC method in-process, bypassing HTTP.
    /// Useful for tooling and tests; dispatch semantics match the wire path.
    pub async fn call_local(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<CallReply, MethodError> {
        let key = method.to_lowercase();
        let entry = self
            .state
            .registry
            .lookup_rpc(&key, None)
            .ok_or_else(|| MethodError::with_code(-32601, format!("Method '{key}' not found")))?;
        let handler = entry.effective();
        handler(
            CallContext::detached(),
            crate::registry::CallRequest::from_args(params),
        )
        .await
    }

    /// Bind the main app and start serving. Returns the bound address
    /// (useful with port 0); serving continues until [`Server::shutdown`].
    pub async fn serve(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let state = Arc::clone(&self.state);
        let service: AppService = Arc::new(move |req| {
            let state = Arc::clone(&state);
            Box::pin(pipeline::handle(state, req))
        });
        self.spawn_app(addr, service, "main").await
    }

    /// Start the health probe app: a separate tiny server answering `path`
    /// with the pre-marshaled body.
    pub async fn serve_health(
        &self,
        path: impl Into<String>,
        addr: SocketAddr,
        body: &Value,
    ) -> Result<SocketAddr> {
        let path = path.into();
        let payload = Bytes::from(serde_json::to_vec(body)?);
        let service: AppService = Arc::new(move |req| {
            let path = path.clone();
            let payload = payload.clone();
            Box::pin(async move {
                if req.method() == Method::GET && req.uri().path() == path {
                    Response::builder()
                        .status(StatusCode::OK)
                        .header(CONTENT_TYPE, "application/json")
                        .body(full_body(payload))
                        .unwrap_or_else(|_| Response::new(empty_body()))
                } else {
                    text_response(StatusCode::NOT_FOUND, "not found")
                }
            })
        });
        self.spawn_app(addr, service, "health").await
    }

    /// Start the metrics app exposing the private registry in text format.
    pub async fn serve_metrics(
        &self,
        path: impl Into<String>,
        addr: SocketAddr,
    ) -> Result<SocketAddr> {
        let path = path.into();
        let metrics = Arc::clone(&self.state.metrics);
        let service: AppService = Arc::new(move |req| {
            let path = path.clone();
            let metrics = Arc::clone(&metrics);
            Box::pin(async move {
                if req.method() == Method::GET && req.uri().path() == path {
                    Response::builder()
                        .status(StatusCode::OK)
                        .header(CONTENT_TYPE, "text/plain; version=0.0.4")
                        .body(full_body(Bytes::from(metrics.gather_text())))
                        .unwrap_or_else(|_| Response::new(empty_body()))
                } else {
                    text_response(StatusCode::NOT_FOUND, "not found")
                }
            })
        });
        self.spawn_app(addr, service, "metrics").await
    }

    async fn spawn_app(
        &self,
        addr: SocketAddr,
        service: AppService,
        name: &'static str,
    ) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(app = name, address = %local, "listening");

        let token = self.shutdown.clone();
        let config = self.state.config.clone();
        let handle = tokio::spawn(accept_loop(listener, token, config, service, name));
        self.tasks.lock().await.push(handle);
        Ok(local)
    }

    /// Graceful stop of every owned server under the 30-second budget.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        let drain = async {
            for handle in tasks.drain(..) {
                let _ = handle.await;
            }
        };
        tokio::time::timeout(SHUTDOWN_BUDGET, drain)
            .await
            .map_err(|_| crate::TransportError::ShutdownTimeout)?;
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("state", &self.state).finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    token: CancellationToken,
    config: ServerConfig,
    service: AppService,
    name: &'static str,
) {
    let graceful = GracefulShutdown::new();
    let permits = Arc::new(Semaphore::new(config.concurrency.min(Semaphore::MAX_PERMITS)));

    loop {
        let permit = tokio::select! {
            _ = token.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(app = name, error = %err, "accept failed");
                continue;
            }
        };
        debug!(app = name, peer = %peer, "new connection");

        let io = TokioIo::new(stream);
        let service = Arc::clone(&service);
        let conn_service = service_fn(move |req: Request<hyper::body::Incoming>| {
            let service = Arc::clone(&service);
            async move {
                let req = req.map(|body| {
                    body.map_err(std::io::Error::other).boxed_unsync()
                });
                Ok::<_, Infallible>(service(req).await)
            }
        });

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .max_buf_size(config.read_buffer_size.max(8 * 1024))
            .header_read_timeout(config.read_timeout)
            .keep_alive(true);
        let conn = graceful.watch(builder.serve_connection(io, conn_service));
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                let text = err.to_string();
                if text.contains("connection closed before message completed") {
                    debug!("client disconnected: {text}");
                } else {
                    error!("connection error: {text}");
                }
            }
            drop(permit);
        });
    }

    if tokio::time::timeout(SHUTDOWN_BUDGET, graceful.shutdown())
        .await
        .is_err()
    {
        warn!(app = name, "shutdown budget exceeded, dropping connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let server = Server::builder().build().unwrap();
        assert_eq!(server.state.config.max_batch_size, 100);
        assert!(!server.state.trace_enabled());
        assert!(!server.state.registry.has_rpc());
    }

    #[test]
    fn test_builder_setters() {
        let server = Server::builder()
            .body_limit(1024)
            .max_batch_size(5)
            .max_parallel_batch(2)
            .client_id_header("X-Caller")
            .prefix("api")
            .with_trace()
            .build()
            .unwrap();
        let config = &server.state.config;
        assert_eq!(config.body_limit, 1024);
        assert_eq!(config.max_batch_size, 5);
        assert_eq!(config.max_parallel_batch, 2);
        assert_eq!(config.client_id_header, "X-Caller");
        assert_eq!(config.prefix, "api");
        assert!(server.state.trace_enabled());
    }

    #[test]
    fn test_enable_after_build() {
        let server = Server::builder().build().unwrap();
        assert!(!server.state.flags().log);
        server.with_log();
        assert!(server.state.flags().log);
        server.with_metrics();
        let flags = server.state.flags();
        assert!(flags.log && flags.metrics && !flags.trace);
    }
}
