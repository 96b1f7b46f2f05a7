//! # Content codecs
//!
//! A thin, uniform encode/decode surface over the media types the transport
//! negotiates: JSON, URL-encoded forms, XML, MsgPack, CBOR and YAML. Every
//! kind maps MIME names (canonical plus aliases) to one codec; unknown MIME
//! falls back to JSON.
//!
//! The contract is `decode(bytes -> T)` / `encode(&T -> bytes)`, both
//! returning [`CodecError`]. Dispatchers mostly work through the
//! [`serde_json::Value`] convenience wrappers and let generated bindings
//! deserialize typed requests from the decoded value.
//!
//! Form payloads are the exception to serde-only decoding: they are decoded
//! through a per-method [`form::FormSchema`] built once by the generator
//! (dotted paths, scalar slices, required fields, case-insensitive aliases).

pub mod form;

use std::io::Cursor;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

pub use form::{FieldSpec, FormSchema};

/// Errors produced by encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("form: {0}")]
    Form(String),

    #[error("xml: {0}")]
    Xml(String),

    #[error("msgpack: {0}")]
    MsgPack(String),

    #[error("cbor: {0}")]
    Cbor(String),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("required field {field:?} missing")]
    RequiredField { field: String },

    #[error("cannot parse {text:?} as {kind:?}")]
    InvalidScalar { kind: ScalarKind, text: String },
}

/// The supported media-type kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentKind {
    #[default]
    Json,
    Form,
    Xml,
    MsgPack,
    Cbor,
    Yaml,
}

impl ContentKind {
    /// Resolve a MIME string to a codec. Parameters (`; charset=...`) are
    /// ignored, matching is case-insensitive, and unknown MIME defaults to
    /// JSON.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/json" | "text/json" => ContentKind::Json,
            "application/x-www-form-urlencoded" => ContentKind::Form,
            "application/xml" | "text/xml" => ContentKind::Xml,
            "application/msgpack" | "application/x-msgpack" => ContentKind::MsgPack,
            "application/cbor" => ContentKind::Cbor,
            "application/x-yaml" | "application/yaml" | "text/yaml" | "text/x-yaml" => {
                ContentKind::Yaml
            }
            _ => ContentKind::Json,
        }
    }

    /// The canonical MIME written to response `Content-Type` headers.
    pub fn mime(&self) -> &'static str {
        match self {
            ContentKind::Json => "application/json",
            ContentKind::Form => "application/x-www-form-urlencoded",
            ContentKind::Xml => "application/xml",
            ContentKind::MsgPack => "application/msgpack",
            ContentKind::Cbor => "application/cbor",
            ContentKind::Yaml => "application/x-yaml",
        }
    }

    /// Decode a payload into any deserializable target.
    ///
    /// Form decoding here is the flat serde view; schema-driven form decoding
    /// (nested paths, slices, required fields) goes through [`FormSchema`].
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            ContentKind::Json => Ok(serde_json::from_slice(bytes)?),
            ContentKind::Form => {
                serde_urlencoded::from_bytes(bytes).map_err(|e| CodecError::Form(e.to_string()))
            }
            ContentKind::Xml => {
                let text =
                    std::str::from_utf8(bytes).map_err(|e| CodecError::Xml(e.to_string()))?;
                quick_xml::de::from_str(text).map_err(|e| CodecError::Xml(e.to_string()))
            }
            ContentKind::MsgPack => {
                rmp_serde::from_slice(bytes).map_err(|e| CodecError::MsgPack(e.to_string()))
            }
            ContentKind::Cbor => ciborium::from_reader(Cursor::new(bytes))
                .map_err(|e| CodecError::Cbor(e.to_string())),
            ContentKind::Yaml => Ok(serde_yaml::from_slice(bytes)?),
        }
    }

    /// Encode any serializable value into this kind's wire form.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            ContentKind::Json => Ok(serde_json::to_vec(value)?),
            ContentKind::Form => serde_urlencoded::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| CodecError::Form(e.to_string())),
            ContentKind::Xml => quick_xml::se::to_string_with_root("payload", value)
                .map(String::into_bytes)
                .map_err(|e| CodecError::Xml(e.to_string())),
            ContentKind::MsgPack => {
                // to_vec_named keeps map keys so a Value round-trips
                rmp_serde::to_vec_named(value).map_err(|e| CodecError::MsgPack(e.to_string()))
            }
            ContentKind::Cbor => {
                let mut out = Vec::new();
                ciborium::into_writer(value, &mut out)
                    .map_err(|e| CodecError::Cbor(e.to_string()))?;
                Ok(out)
            }
            ContentKind::Yaml => Ok(serde_yaml::to_string(value)?.into_bytes()),
        }
    }

    /// Decode into a dynamic [`Value`], the dispatchers' working currency.
    pub fn decode_value(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        self.decode(bytes)
    }

    /// Encode a dynamic [`Value`].
    pub fn encode_value(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        self.encode(value)
    }
}

/// Scalar target types for wire-text conversion (path segments, query and
/// header values, form fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Bool,
    Int,
    Uint,
    Float,
}

impl ScalarKind {
    /// Convert one wire token into a typed JSON value.
    pub fn convert(&self, text: &str) -> Result<Value, CodecError> {
        let invalid = || CodecError::InvalidScalar {
            kind: *self,
            text: text.to_string(),
        };
        match self {
            ScalarKind::String => Ok(Value::String(text.to_string())),
            ScalarKind::Bool => text.parse::<bool>().map(Value::Bool).map_err(|_| invalid()),
            ScalarKind::Int => text
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid()),
            ScalarKind::Uint => text
                .parse::<u64>()
                .map(Value::from)
                .map_err(|_| invalid()),
            ScalarKind::Float => text
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| invalid()),
        }
    }
}

/// Wire representation of one bound argument: a single scalar, or a slice of
/// scalars joined by `,` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar(ScalarKind),
    Slice(ScalarKind),
}

impl ValueKind {
    /// Convert wire text per this kind. Slices are comma-split with trim;
    /// empty tokens are dropped.
    pub fn convert(&self, text: &str) -> Result<Value, CodecError> {
        match self {
            ValueKind::Scalar(scalar) => scalar.convert(text),
            ValueKind::Slice(scalar) => {
                let mut items = Vec::new();
                for token in text.split(',') {
                    let token = token.trim();
                    if token.is_empty() {
                        continue;
                    }
                    items.push(scalar.convert(token)?);
                }
                Ok(Value::Array(items))
            }
        }
    }

    /// Render a decoded value back into wire text (the inverse of
    /// [`ValueKind::convert`]).
    pub fn render(&self, value: &Value) -> String {
        match value {
            Value::Array(items) => items
                .iter()
                .map(render_scalar)
                .collect::<Vec<_>>()
                .join(","),
            other => render_scalar(other),
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
