use std::sync::Arc;

use hyper::StatusCode;
use serde_json::Value;

use girder_jsonrpc::{ErrorObject, error_codes};

/// Implemented by user error types that carry a wire code: an HTTP status for
/// REST methods, a JSON-RPC error code otherwise.
pub trait ErrorCode {
    fn code(&self) -> i32;
}

/// The wire-level error a method invocation produced.
///
/// Generated bindings fold their typed error variants into this shape; the
/// dispatchers only ever look at the code, the sanitized message, and the
/// optional data payload.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct MethodError {
    pub code: Option<i32>,
    pub message: String,
    pub data: Option<Value>,
}

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// A parameter-decode failure; maps to −32602 and HTTP 400.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_code(error_codes::INVALID_PARAMS, message)
    }

    /// Fold any coded error into the wire shape.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: ErrorCode + std::fmt::Display,
    {
        Self::with_code(err.code(), err.to_string())
    }

    /// First line of the message; internal detail past it never reaches the
    /// wire.
    pub fn sanitized_message(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// The HTTP status this error maps to. Codes outside the status range
    /// (including JSON-RPC codes) collapse to 500.
    pub fn http_status(&self) -> StatusCode {
        match self.code {
            Some(code) if (100..=599).contains(&code) => {
                StatusCode::from_u16(code as u16).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The JSON-RPC error code: the declared code, else internal error.
    pub fn rpc_code(&self) -> i32 {
        self.code.unwrap_or(error_codes::INTERNAL_ERROR)
    }

    /// The JSON-RPC error object for this error.
    pub fn to_error_object(&self) -> ErrorObject {
        let mut object = ErrorObject::with_code(self.rpc_code(), self.sanitized_message());
        if let Some(data) = &self.data {
            object = object.with_data(data.clone());
        }
        object
    }

    /// The REST error body: `{"message": ..., "data"?: ...}`.
    pub fn to_body(&self) -> Value {
        let mut body = serde_json::Map::new();
        body.insert(
            "message".to_string(),
            Value::String(self.sanitized_message().to_string()),
        );
        if let Some(data) = &self.data {
            body.insert("data".to_string(), data.clone());
        }
        Value::Object(body)
    }
}

/// User hook that may transform a handler error before code extraction.
/// Invoked on both the REST and the JSON-RPC paths.
pub type ErrorHandler = Arc<dyn Fn(MethodError) -> MethodError + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("entity not found")]
    struct NotFound;

    impl ErrorCode for NotFound {
        fn code(&self) -> i32 {
            404
        }
    }

    #[test]
    fn test_coded_error_maps_to_status() {
        let err = MethodError::from_error(&NotFound);
        assert_eq!(err.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(err.rpc_code(), 404);
    }

    #[test]
    fn test_uncoded_error_defaults() {
        let err = MethodError::new("boom");
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.rpc_code(), error_codes::INTERNAL_ERROR);
    }

    #[test]
    fn test_rpc_code_passthrough() {
        let err = MethodError::invalid_params("bad shape");
        assert_eq!(err.rpc_code(), -32602);
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_message_sanitized_to_first_line() {
        let err = MethodError::new("decode failed\ninternal: stack frame detail");
        assert_eq!(err.sanitized_message(), "decode failed");
        assert_eq!(err.to_body(), json!({"message": "decode failed"}));
    }

    #[test]
    fn test_error_object_carries_data() {
        let err = MethodError::with_code(-32050, "rejected").with_data(json!({"reason": "quota"}));
        let object = err.to_error_object();
        assert_eq!(object.code, -32050);
        assert_eq!(object.data, Some(json!({"reason": "quota"})));
    }
}
