//! Method descriptors and the contract registry.
//!
//! A generated service registers one [`Contract`] per interface; each method
//! contributes a [`MethodDescriptor`] binding it to its wire encoding and an
//! invocation thunk. The registry is assembled during server construction —
//! JSON-RPC lookup keys are lowercased exactly once, at registration — and
//! read without synchronization afterwards; only the middleware-wrapped
//! effective handlers sit behind a lock so tracing/metrics/logging can be
//! enabled after build.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use hyper::{Method, StatusCode};
use serde_json::Value;
use tokio::io::AsyncRead;

use girder_codec::{ContentKind, FormSchema, ValueKind};

use crate::context::CallContext;
use crate::error::MethodError;
use crate::metrics::Protocol;

/// An opaque byte stream crossing the contract boundary: a request body, a
/// multipart part, or a streamed result.
pub type BodyStream = Box<dyn AsyncRead + Send + Unpin>;

/// A single streamed result with its wire content type.
pub struct StreamPayload {
    pub content_type: String,
    pub reader: BodyStream,
}

impl StreamPayload {
    pub fn new(content_type: impl Into<String>, reader: BodyStream) -> Self {
        Self {
            content_type: content_type.into(),
            reader,
        }
    }

    pub fn octet_stream(reader: BodyStream) -> Self {
        Self::new("application/octet-stream", reader)
    }
}

impl std::fmt::Debug for StreamPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPayload")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// One part of a multipart response, emitted in declared order.
pub struct StreamPart {
    pub name: String,
    pub content_type: Option<String>,
    pub reader: BodyStream,
}

impl std::fmt::Debug for StreamPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPart")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// The decoded request handed through the middleware chain to the binding:
/// structured arguments merged into one object plus stream arguments in
/// declared order.
#[derive(Default)]
pub struct CallRequest {
    pub args: Value,
    pub streams: Vec<BodyStream>,
}

impl std::fmt::Debug for CallRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRequest")
            .field("args", &self.args)
            .field("streams", &self.streams.len())
            .finish()
    }
}

impl CallRequest {
    pub fn from_args(args: Value) -> Self {
        Self {
            args,
            streams: Vec::new(),
        }
    }
}

/// What a method invocation produced.
#[derive(Debug)]
pub enum CallReply {
    /// Structured results keyed by result name.
    Value(Value),
    /// A single streamed result.
    Stream(StreamPayload),
    /// Multipart results, declared order.
    Parts(Vec<StreamPart>),
    /// Nothing beyond the success status.
    Empty,
}

impl CallReply {
    /// The structured value for serialization; streams have none.
    pub fn into_value(self) -> Value {
        match self {
            CallReply::Value(value) => value,
            _ => Value::Null,
        }
    }

    /// A serializable stand-in for logging; stream payloads are summarized
    /// instead of consumed.
    pub fn loggable(&self) -> Value {
        match self {
            CallReply::Value(value) => value.clone(),
            CallReply::Stream(payload) => {
                Value::String(format!("<stream: {}>", payload.content_type))
            }
            CallReply::Parts(parts) => Value::String(format!("<multipart: {} parts>", parts.len())),
            CallReply::Empty => Value::Null,
        }
    }
}

pub type HandlerFuture = BoxFuture<'static, std::result::Result<CallReply, MethodError>>;

/// The invocation thunk: context plus decoded request in, reply out.
pub type Handler = Arc<dyn Fn(CallContext, CallRequest) -> HandlerFuture + Send + Sync>;

/// A middleware takes the next implementation and returns a wrapped one.
/// Composition is right-to-left: the last wrapper applied runs outermost.
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// A custom response handler declared by annotation: takes over serialization
/// entirely and produces the full HTTP response.
pub type CustomResponder = Arc<
    dyn Fn(CallContext, CallReply) -> BoxFuture<'static, std::result::Result<hyper::Response<crate::BoxBody>, MethodError>>
        + Send
        + Sync,
>;

/// Where one REST argument is read from. Binding precedence is the variant
/// order: path over query over header over cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BindSource {
    Path,
    Query,
    Header,
    Cookie,
}

/// Maps one argument name to its wire name and scalar kind.
#[derive(Debug, Clone)]
pub struct ArgBinding {
    pub arg: String,
    pub wire: String,
    pub kind: ValueKind,
    pub source: BindSource,
}

impl ArgBinding {
    pub fn new(
        source: BindSource,
        arg: impl Into<String>,
        wire: impl Into<String>,
        kind: ValueKind,
    ) -> Self {
        Self {
            arg: arg.into(),
            wire: wire.into(),
            kind,
            source,
        }
    }

    pub fn path(arg: impl Into<String>, kind: ValueKind) -> Self {
        let arg = arg.into();
        let wire = arg.clone();
        Self::new(BindSource::Path, arg, wire, kind)
    }

    pub fn query(arg: impl Into<String>, wire: impl Into<String>, kind: ValueKind) -> Self {
        Self::new(BindSource::Query, arg, wire, kind)
    }

    pub fn header(arg: impl Into<String>, wire: impl Into<String>, kind: ValueKind) -> Self {
        Self::new(BindSource::Header, arg, wire, kind)
    }

    pub fn cookie(arg: impl Into<String>, wire: impl Into<String>, kind: ValueKind) -> Self {
        Self::new(BindSource::Cookie, arg, wire, kind)
    }
}

/// Binds a stream argument or result to its multipart part.
#[derive(Debug, Clone)]
pub struct StreamBinding {
    pub arg: String,
    /// `http-part-name`: the part name on the wire.
    pub part: String,
    /// `http-part-content`: enforced on upload, emitted on download.
    pub content_type: Option<String>,
}

impl StreamBinding {
    pub fn new(arg: impl Into<String>, part: impl Into<String>) -> Self {
        Self {
            arg: arg.into(),
            part: part.into(),
            content_type: None,
        }
    }

    pub fn content_type(mut self, mime: impl Into<String>) -> Self {
        self.content_type = Some(mime.into());
        self
    }
}

/// One declared structured result field.
#[derive(Debug, Clone)]
pub struct ResultField {
    pub name: String,
    /// `,inline`: merge (or write directly) at the top level.
    pub inline: bool,
}

impl ResultField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inline: false,
        }
    }

    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }
}

/// `log-skip` annotation: omit request and/or response from the logger
/// middleware's event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSkip {
    pub request: bool,
    pub response: bool,
}

/// Runtime record binding one contract method to its wire-level encoding,
/// decoding and invocation.
#[derive(Clone)]
pub struct MethodDescriptor {
    pub contract: String,
    pub method: String,
    pub verb: Method,
    pub path: String,
    pub success: StatusCode,
    pub request_content: ContentKind,
    pub response_content: ContentKind,
    pub multipart: bool,
    pub bindings: Vec<ArgBinding>,
    pub stream_args: Vec<StreamBinding>,
    pub stream_results: Vec<StreamBinding>,
    pub form_schema: Option<FormSchema>,
    pub results: Vec<ResultField>,
    /// Declared error variants by code.
    pub declared_errors: Vec<i32>,
    /// `defaultError: skip` — suppresses the default variant only; an
    /// explicit code mapping always wins.
    pub default_error_skip: bool,
    pub log_skip: LogSkip,
    pub custom_response: Option<CustomResponder>,
    pub handler: Handler,
}

impl MethodDescriptor {
    pub fn new(contract: impl Into<String>, method: impl Into<String>, handler: Handler) -> Self {
        Self {
            contract: contract.into(),
            method: method.into(),
            verb: Method::POST,
            path: String::new(),
            success: StatusCode::OK,
            request_content: ContentKind::Json,
            response_content: ContentKind::Json,
            multipart: false,
            bindings: Vec::new(),
            stream_args: Vec::new(),
            stream_results: Vec::new(),
            form_schema: None,
            results: Vec::new(),
            declared_errors: Vec::new(),
            default_error_skip: false,
            log_skip: LogSkip::default(),
            custom_response: None,
            handler,
        }
    }

    pub fn route(mut self, verb: Method, path: impl Into<String>) -> Self {
        self.verb = verb;
        self.path = path.into();
        self
    }

    pub fn success(mut self, status: StatusCode) -> Self {
        self.success = status;
        self
    }

    pub fn request_content(mut self, kind: ContentKind) -> Self {
        self.request_content = kind;
        self
    }

    pub fn response_content(mut self, kind: ContentKind) -> Self {
        self.response_content = kind;
        self
    }

    pub fn multipart(mut self) -> Self {
        self.multipart = true;
        self
    }

    pub fn binding(mut self, binding: ArgBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn stream_arg(mut self, binding: StreamBinding) -> Self {
        self.stream_args.push(binding);
        self
    }

    pub fn stream_result(mut self, binding: StreamBinding) -> Self {
        self.stream_results.push(binding);
        self
    }

    pub fn form_schema(mut self, schema: FormSchema) -> Self {
        self.form_schema = Some(schema);
        self
    }

    pub fn result(mut self, field: ResultField) -> Self {
        self.results.push(field);
        self
    }

    pub fn declared_error(mut self, code: i32) -> Self {
        self.declared_errors.push(code);
        self
    }

    pub fn skip_default_error(mut self) -> Self {
        self.default_error_skip = true;
        self
    }

    pub fn log_skip(mut self, skip: LogSkip) -> Self {
        self.log_skip = skip;
        self
    }

    pub fn custom_response(mut self, responder: CustomResponder) -> Self {
        self.custom_response = Some(responder);
        self
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("contract", &self.contract)
            .field("method", &self.method)
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("multipart", &self.multipart)
            .finish_non_exhaustive()
    }
}

/// A named collection of methods, the unit of registration.
#[derive(Debug)]
pub struct Contract {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl Contract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, descriptor: MethodDescriptor) -> Self {
        self.methods.push(descriptor);
        self
    }
}

/// One installed method: its descriptor, protocol, and the effective
/// (middleware-wrapped) handler.
pub struct MethodEntry {
    pub desc: MethodDescriptor,
    pub protocol: Protocol,
    effective: RwLock<Handler>,
}

impl MethodEntry {
    fn new(desc: MethodDescriptor, protocol: Protocol) -> Self {
        let base = desc.handler.clone();
        Self {
            desc,
            protocol,
            effective: RwLock::new(base),
        }
    }

    /// The handler dispatchers invoke: the base thunk wrapped by whatever
    /// middleware is currently enabled.
    pub fn effective(&self) -> Handler {
        self.effective
            .read()
            .map(|h| h.clone())
            .unwrap_or_else(|_| self.desc.handler.clone())
    }

    pub fn set_effective(&self, handler: Handler) {
        if let Ok(mut slot) = self.effective.write() {
            *slot = handler;
        }
    }
}

impl std::fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEntry")
            .field("desc", &self.desc)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// All installed contracts: REST entries in registration order, JSON-RPC
/// entries keyed by pre-lowercased `contract.method`.
#[derive(Debug, Default)]
pub struct ContractRegistry {
    rest: Vec<Arc<MethodEntry>>,
    rpc: HashMap<String, Arc<MethodEntry>>,
    rpc_contracts: Vec<String>,
}

impl ContractRegistry {
    pub fn register_rest(&mut self, contract: Contract) {
        for method in contract.methods {
            self.rest
                .push(Arc::new(MethodEntry::new(method, Protocol::Rest)));
        }
    }

    pub fn register_rpc(&mut self, contract: Contract) {
        self.rpc_contracts.push(contract.name.to_lowercase());
        for method in contract.methods {
            let key = format!("{}.{}", contract.name, method.method).to_lowercase();
            self.rpc
                .insert(key, Arc::new(MethodEntry::new(method, Protocol::JsonRpc)));
        }
    }

    /// Case-insensitive method lookup; the caller lowercases exactly once.
    /// `scope` restricts the lookup to one contract's methods (the
    /// per-contract batch endpoint).
    pub fn lookup_rpc(&self, lowercased: &str, scope: Option<&str>) -> Option<Arc<MethodEntry>> {
        if let Some(contract) = scope {
            let prefix = format!("{contract}.");
            if !lowercased.starts_with(&prefix) {
                return None;
            }
        }
        self.rpc.get(lowercased).cloned()
    }

    pub fn rest_entries(&self) -> &[Arc<MethodEntry>] {
        &self.rest
    }

    pub fn rpc_contracts(&self) -> &[String] {
        &self.rpc_contracts
    }

    pub fn has_rpc(&self) -> bool {
        !self.rpc.is_empty()
    }

    /// Every installed entry, both protocols.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<MethodEntry>> {
        self.rest.iter().chain(self.rpc.values())
    }
}
