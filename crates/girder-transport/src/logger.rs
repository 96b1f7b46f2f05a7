//! Per-request leveled logging.
//!
//! The `X-Log-Level` header lets one request raise or lower its own log
//! verbosity without touching the process-wide subscriber. [`RequestLogger`]
//! is a threshold filter in front of `tracing` events: events below the
//! request's floor are dropped before dispatch.

use serde_json::Value;

/// Log levels accepted in `X-Log-Level`, lowest to highest severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Case-insensitive parse; anything unrecognized is None.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Request-scoped logger bound into the call context.
///
/// Carries the per-request level floor plus structured fields accumulated by
/// header handlers; every event emitted through it includes those fields.
#[derive(Debug, Clone, Default)]
pub struct RequestLogger {
    level: LogLevel,
    fields: Vec<(String, Value)>,
}

impl RequestLogger {
    pub fn with_level(level: LogLevel) -> Self {
        Self {
            level,
            fields: Vec::new(),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Attach a structured field to every subsequent event.
    pub fn push_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    /// Emit one event at `level` with the accumulated fields plus `extra`.
    pub fn log(&self, level: LogLevel, message: &str, extra: &[(&str, &Value)]) {
        if !self.enabled(level) {
            return;
        }
        let mut rendered = serde_json::Map::new();
        for (name, value) in &self.fields {
            rendered.insert(name.clone(), value.clone());
        }
        for (name, value) in extra {
            rendered.insert((*name).to_string(), (*value).clone());
        }
        let fields = Value::Object(rendered);
        match level {
            LogLevel::Debug => tracing::debug!(fields = %fields, "{message}"),
            LogLevel::Info => tracing::info!(fields = %fields, "{message}"),
            LogLevel::Warn => tracing::warn!(fields = %fields, "{message}"),
            LogLevel::Error => tracing::error!(fields = %fields, "{message}"),
        }
    }
}

/// Install a process-wide `tracing` subscriber honoring `RUST_LOG`.
/// Intended for generated service mains; safe to call once.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
