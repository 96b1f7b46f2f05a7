//! Permissive CORS headers for browser-based clients.

use hyper::HeaderMap;
use hyper::header::{HeaderValue, ORIGIN};

/// CORS layer applied to outgoing responses when enabled in the config.
pub struct CorsLayer;

impl CorsLayer {
    /// Apply permissive CORS headers to a response.
    pub fn apply_cors_headers(headers: &mut HeaderMap) {
        headers.insert(
            "Access-Control-Allow-Origin",
            HeaderValue::from_static("*"),
        );
        headers.insert(
            "Access-Control-Allow-Methods",
            HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
        );
        headers.insert(
            "Access-Control-Allow-Headers",
            HeaderValue::from_static("Content-Type, Accept, X-Log-Level, X-Sync-On, X-Client-Id"),
        );
        headers.insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));
    }

    /// Whether the request looks like a cross-origin browser request.
    pub fn is_cors_request(headers: &HeaderMap) -> bool {
        headers.contains_key(ORIGIN)
    }
}
