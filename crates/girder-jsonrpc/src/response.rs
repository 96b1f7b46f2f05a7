use serde::Serialize;
use serde_json::Value;

use crate::error::ErrorObject;
use crate::types::{RequestId, Version};

/// A successful reply: carries `result`, never `error`.
#[derive(Debug, Clone, Serialize)]
pub struct ResultReply {
    #[serde(rename = "jsonrpc")]
    pub version: Version,
    pub result: Value,
    pub id: RequestId,
}

/// An error reply: carries `error`, never `result`. The id may be null when
/// the request failed before id extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReply {
    #[serde(rename = "jsonrpc")]
    pub version: Version,
    pub error: ErrorObject,
    // Serialized as literal null when None, so the id field is never omitted.
    pub id: Option<RequestId>,
}

/// Union of the two reply shapes. Mutual exclusion of `result` and `error`
/// holds by construction.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    Result(ResultReply),
    Error(ErrorReply),
}

impl RpcReply {
    pub fn result(id: RequestId, result: Value) -> Self {
        RpcReply::Result(ResultReply {
            version: Version::V2,
            result,
            id,
        })
    }

    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        RpcReply::Error(ErrorReply {
            version: Version::V2,
            error,
            id,
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RpcReply::Error(_))
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            RpcReply::Result(r) => Some(&r.id),
            RpcReply::Error(e) => e.id.as_ref(),
        }
    }

    pub fn error_code(&self) -> Option<i32> {
        match self {
            RpcReply::Result(_) => None,
            RpcReply::Error(e) => Some(e.error.code),
        }
    }
}

impl From<ErrorObject> for RpcReply {
    fn from(error: ErrorObject) -> Self {
        RpcReply::error(None, error)
    }
}
