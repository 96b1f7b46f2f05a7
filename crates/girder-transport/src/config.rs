use std::time::Duration;

/// Configuration for the transport server.
///
/// Everything here is applied before the HTTP engine is built; contract
/// registration happens afterwards, so configuration can never observe a
/// half-installed route table.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum request body size in bytes.
    pub body_limit: usize,
    /// Read buffer hint for the HTTP engine.
    pub read_buffer_size: usize,
    /// Write buffer hint for the HTTP engine.
    pub write_buffer_size: usize,
    /// Header read timeout.
    pub read_timeout: Duration,
    /// Response write budget; also the shared deadline for batch elements.
    pub write_timeout: Duration,
    /// Keep-alive idle timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub concurrency: usize,
    /// Maximum number of elements in one JSON-RPC batch.
    pub max_batch_size: usize,
    /// Worker bound for parallel batch execution.
    pub max_parallel_batch: usize,
    /// Header carrying the client identifier used as a metrics label.
    pub client_id_header: String,
    /// Route prefix prepended to every installed route.
    pub prefix: String,
    /// Apply permissive CORS headers to responses.
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            body_limit: 8 * 1024 * 1024,
            read_buffer_size: 4 * 1024,
            write_buffer_size: 4 * 1024,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            concurrency: 256 * 1024,
            max_batch_size: 100,
            max_parallel_batch: 10,
            client_id_header: "X-Client-Id".to_string(),
            prefix: String::new(),
            enable_cors: false,
        }
    }
}

impl ServerConfig {
    /// Join the configured prefix with a route path.
    pub fn prefixed(&self, path: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        let path = path.trim_start_matches('/');
        if prefix.is_empty() {
            format!("/{path}")
        } else {
            format!("/{prefix}/{path}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.body_limit, 8 * 1024 * 1024);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.concurrency, 256 * 1024);
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.max_parallel_batch, 10);
        assert_eq!(config.client_id_header, "X-Client-Id");
    }

    #[test]
    fn test_prefixed_paths() {
        let mut config = ServerConfig::default();
        assert_eq!(config.prefixed("math"), "/math");
        assert_eq!(config.prefixed("/math"), "/math");
        config.prefix = "api".to_string();
        assert_eq!(config.prefixed("math"), "/api/math");
        config.prefix = "/api/".to_string();
        assert_eq!(config.prefixed("/math/add"), "/api/math/add");
    }
}
