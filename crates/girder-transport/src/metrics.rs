//! Metrics registry.
//!
//! Everything registers on a private registry so generated services never
//! collide with a host application's default registry. The exposition
//! endpoint runs on its own HTTP app (see `server::Server::serve_metrics`) to
//! keep scrapes out of the main pipeline.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use crate::Result;

/// Duration buckets, 1 ms to 10 s, eleven fixed edges.
pub const DURATION_BUCKETS: [f64; 11] = [
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Protocol label values for counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Rest,
    JsonRpc,
}

impl Protocol {
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Rest => "http",
            Protocol::JsonRpc => "jsonrpc",
        }
    }
}

/// All metric handles, constructed once during server setup and updated from
/// any goroutine-equivalent without further synchronization.
pub struct Metrics {
    registry: Registry,
    /// Version gauge: labels part, version, hostname; set to 1.
    pub version: IntGaugeVec,
    /// Incoming requests by {protocol, result, client_id}.
    pub requests: IntCounterVec,
    /// Recovered panics.
    pub panics: IntCounter,
    /// Error responses by {protocol, code, client_id}.
    pub error_responses: IntCounterVec,
    /// In-flight requests by {path, client_id}.
    pub in_flight: IntGaugeVec,
    /// Request duration seconds by {client_id}.
    pub duration: HistogramVec,
    /// JSON-RPC batch lengths.
    pub batch_size: Histogram,
    /// Per-method call counter by {service, method, success, err_code, client_id}.
    pub method_calls: IntCounterVec,
    /// Per-method latency seconds, same labels.
    pub method_latency: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let version = IntGaugeVec::new(
            Opts::new("service_version", "Running service version"),
            &["part", "version", "hostname"],
        )?;
        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Incoming requests by outcome"),
            &["protocol", "result", "client_id"],
        )?;
        let panics = IntCounter::new("panics_total", "Recovered handler panics")?;
        let error_responses = IntCounterVec::new(
            Opts::new("error_responses_total", "Error responses by status code"),
            &["protocol", "code", "client_id"],
        )?;
        let in_flight = IntGaugeVec::new(
            Opts::new("requests_in_flight", "Requests currently being served"),
            &["path", "client_id"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Request wall time")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["client_id"],
        )?;
        let batch_size = Histogram::with_opts(
            HistogramOpts::new("batch_size", "JSON-RPC batch lengths")
                .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        )?;
        let method_calls = IntCounterVec::new(
            Opts::new("requests_count", "Method invocations"),
            &["service", "method", "success", "err_code", "client_id"],
        )?;
        let method_latency = HistogramVec::new(
            HistogramOpts::new("requests_latency_seconds", "Method invocation latency")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["service", "method", "success", "err_code", "client_id"],
        )?;

        registry.register(Box::new(version.clone()))?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(panics.clone()))?;
        registry.register(Box::new(error_responses.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;
        registry.register(Box::new(method_calls.clone()))?;
        registry.register(Box::new(method_latency.clone()))?;

        Ok(Self {
            registry,
            version,
            requests,
            panics,
            error_responses,
            in_flight,
            duration,
            batch_size,
            method_calls,
            method_latency,
        })
    }

    /// Set the version gauge to 1 for `girder:<version>` on this host.
    pub fn set_version(&self, version: &str) {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        self.version
            .with_label_values(&["girder", &format!("girder:{version}"), &host])
            .set(1);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of the whole registry.
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
