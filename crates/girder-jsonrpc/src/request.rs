use serde::{Deserialize, Deserializer};
use serde_json::value::RawValue;

use crate::error::ErrorObject;
use crate::types::RequestId;

/// Wire shape of a single JSON-RPC request.
///
/// Every field is optional at parse time so that a structurally valid JSON
/// object never fails to deserialize; [`RpcRequest::validate`] turns missing
/// or malformed protocol fields into *invalid request* errors, as JSON-RPC
/// 2.0 requires (parse errors are reserved for malformed JSON).
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    /// Parameter payload, decoded lazily by the method binding.
    #[serde(default)]
    pub params: Option<Box<RawValue>>,
    /// Absent and `null` are distinct on the wire but both mark a
    /// notification; the raw text is kept for the echo invariant.
    #[serde(default, deserialize_with = "raw_id")]
    pub id: Option<RequestId>,
}

fn raw_id<'de, D>(deserializer: D) -> Result<Option<RequestId>, D::Error>
where
    D: Deserializer<'de>,
{
    // Box<RawValue> captures an explicit `null` as the literal "null" instead
    // of collapsing it into None like Option would.
    Box::<RawValue>::deserialize(deserializer).map(|raw| Some(RequestId::from_raw(raw)))
}

impl RpcRequest {
    /// A notification has no id, or a null one. It never produces a reply.
    pub fn is_notification(&self) -> bool {
        match &self.id {
            None => true,
            Some(id) => id.is_null(),
        }
    }

    /// Enforce the protocol fields: version tag must equal `2.0` and a
    /// non-empty method name must be present.
    pub fn validate(&self) -> Result<(), ErrorObject> {
        match self.jsonrpc.as_deref() {
            Some(crate::JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(ErrorObject::invalid_request(Some(format!(
                    "unsupported jsonrpc version {other:?}"
                ))));
            }
            None => {
                return Err(ErrorObject::invalid_request(Some(
                    "missing jsonrpc version".to_string(),
                )));
            }
        }
        match self.method.as_deref() {
            Some(m) if !m.is_empty() => Ok(()),
            _ => Err(ErrorObject::invalid_request(Some(
                "missing method".to_string(),
            ))),
        }
    }

    /// The id a reply to this request must carry, if any.
    pub fn reply_id(&self) -> Option<RequestId> {
        self.id.clone()
    }
}

/// Shape of an incoming JSON-RPC payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Single,
    Batch,
}

/// Decide whether a payload is a single request or a batch by peeking at the
/// first significant byte, at most 16 bytes in, skipping ASCII whitespace.
/// Anything other than `{` or `[` is a parse error.
pub fn sniff_payload(body: &[u8]) -> Option<PayloadShape> {
    for &byte in body.iter().take(16) {
        match byte {
            b' ' | b'\t' | b'\r' | b'\n' => continue,
            b'{' => return Some(PayloadShape::Single),
            b'[' => return Some(PayloadShape::Batch),
            _ => return None,
        }
    }
    None
}
