//! Request overlay: a per-request snapshot of headers and cookies.
//!
//! JSON-RPC batch elements share one HTTP envelope, but each method may
//! declare its own header and cookie arguments. The overlay is captured once
//! per request, attached to the call context, and read without
//! synchronization afterwards.

use std::collections::HashMap;

use hyper::HeaderMap;
use hyper::header::COOKIE;

/// Immutable header/cookie snapshot. Keyed by the exact wire name
/// (case-insensitive, as header names are); lookups return the empty string
/// when absent.
#[derive(Debug, Clone, Default)]
pub struct RequestOverlay {
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl RequestOverlay {
    /// Materialize the overlay from the request headers. Cookies come from
    /// the `Cookie` header, split on `;` with `name=value` pairs.
    pub fn capture(headers: &HeaderMap) -> Self {
        let mut captured = HashMap::new();
        for (name, value) in headers {
            if let Ok(text) = value.to_str() {
                captured.insert(name.as_str().to_ascii_lowercase(), text.to_string());
            }
        }

        let mut cookies = HashMap::new();
        for value in headers.get_all(COOKIE) {
            let Ok(text) = value.to_str() else { continue };
            for pair in text.split(';') {
                if let Some((name, value)) = pair.split_once('=') {
                    cookies.insert(name.trim().to_string(), value.trim().to_string());
                }
            }
        }

        Self {
            headers: captured,
            cookies,
        }
    }

    /// Header value by wire name; empty string when absent.
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Cookie value by name; empty string when absent.
    pub fn cookie(&self, name: &str) -> &str {
        self.cookies.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.cookies.is_empty()
    }
}
