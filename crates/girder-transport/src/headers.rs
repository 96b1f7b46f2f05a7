//! User-supplied header handlers.
//!
//! A header handler is consulted once per request for its header. It receives
//! the incoming value (empty string when absent) and returns advice: override
//! the request header, inject a response header, and/or attach a structured
//! log field. The table is ordered, built during server construction, and
//! read-only afterwards.

use std::sync::Arc;

use serde_json::Value;

/// What a header handler instructs the pipeline to do.
#[derive(Debug, Clone, Default)]
pub struct HeaderAdvice {
    /// Replace the request header with this value before dispatch.
    pub request_value: Option<String>,
    /// Inject this value into the response headers.
    pub response_value: Option<String>,
    /// Attach this field to the request's structured log context.
    pub log_field: Option<(String, Value)>,
}

impl HeaderAdvice {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn request(mut self, value: impl Into<String>) -> Self {
        self.request_value = Some(value.into());
        self
    }

    pub fn response(mut self, value: impl Into<String>) -> Self {
        self.response_value = Some(value.into());
        self
    }

    pub fn log(mut self, name: impl Into<String>, value: Value) -> Self {
        self.log_field = Some((name.into(), value));
        self
    }
}

/// Handler signature: current request value in, advice out.
pub type HeaderHandler = Arc<dyn Fn(&str) -> HeaderAdvice + Send + Sync>;

/// Ordered header-handler table; insertion order is invocation order.
#[derive(Clone, Default)]
pub struct HeaderHandlers {
    entries: Vec<(String, HeaderHandler)>,
}

impl HeaderHandlers {
    pub fn insert<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&str) -> HeaderAdvice + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Arc::new(handler)));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderHandler)> {
        self.entries.iter().map(|(name, h)| (name.as_str(), h))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl std::fmt::Debug for HeaderHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderHandlers")
            .field(
                "headers",
                &self.entries.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}
