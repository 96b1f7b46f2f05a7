use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// The protocol version tag. Only `"2.0"` exists on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Version {
    #[default]
    #[serde(rename = "2.0")]
    V2,
}

/// A JSON-RPC request id, preserved exactly as it appeared on the wire.
///
/// JSON-RPC 2.0 allows numbers, strings, and null. Rather than normalizing into a
/// typed enum, the raw JSON text is kept so the reply echoes the id
/// byte-for-byte (`7`, `"7"` and `7.0` stay distinct).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Box<RawValue>);

impl RequestId {
    pub fn from_raw(raw: Box<RawValue>) -> Self {
        Self(raw)
    }

    pub fn number(n: i64) -> Self {
        Self(raw_literal(n.to_string()))
    }

    pub fn string(s: &str) -> Self {
        // to_string on &str cannot fail
        Self(raw_literal(serde_json::to_string(s).unwrap_or_default()))
    }

    pub fn null() -> Self {
        Self(raw_literal("null".to_string()))
    }

    /// A null id marks a notification on the request side and an
    /// unidentifiable request on the response side.
    pub fn is_null(&self) -> bool {
        self.0.get() == "null"
    }

    /// The exact wire text of the id.
    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

fn raw_literal(text: String) -> Box<RawValue> {
    // Inputs are JSON literals produced above, never attacker-controlled.
    RawValue::from_string(text)
        .unwrap_or_else(|_| RawValue::from_string("null".to_string()).unwrap())
}

impl PartialEq for RequestId {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

impl Eq for RequestId {}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.get())
    }
}
