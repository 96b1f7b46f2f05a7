//! Schema-driven URL-encoded form decoding.
//!
//! The original runtime walked struct tags reflectively on every request;
//! here the generator emits one [`FormSchema`] per request type and the
//! decoder dispatches over it, caching nothing at runtime. A schema lists the
//! dotted field paths (`a.b.c`), their wire kinds, required flags and
//! case-insensitive aliases.

use serde_json::{Map, Value};

use crate::{CodecError, ValueKind};

/// One form field: a dotted path into the request object plus its wire kind.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub path: String,
    pub kind: ValueKind,
    pub required: bool,
    pub aliases: Vec<String>,
}

impl FieldSpec {
    pub fn new(path: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            path: path.into(),
            kind,
            required: false,
            aliases: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    fn matches(&self, key: &str) -> bool {
        self.path.eq_ignore_ascii_case(key)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(key))
    }
}

/// Per-request-type form schema, built once by the generator.
#[derive(Debug, Clone, Default)]
pub struct FormSchema {
    fields: Vec<FieldSpec>,
}

impl FormSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Decode an URL-encoded body into a nested object.
    ///
    /// Keys are matched case-insensitively against field paths and aliases;
    /// unknown keys are ignored. Repeated keys accumulate into arrays, and a
    /// slice field given once is comma-split with trim. Missing required
    /// fields fail with the field's own error.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let mut root = Map::new();
        for (key, raw) in form_urlencoded::parse(bytes) {
            let Some(spec) = self.fields.iter().find(|f| f.matches(&key)) else {
                continue;
            };
            let value = spec.kind.convert(&raw)?;
            insert_path(&mut root, &spec.path, value);
        }
        for spec in &self.fields {
            if spec.required && lookup_path(&root, &spec.path).is_none() {
                return Err(CodecError::RequiredField {
                    field: spec.path.clone(),
                });
            }
        }
        Ok(Value::Object(root))
    }

    /// Encode a decoded object back into URL-encoded pairs, slices joined by
    /// `,`. The inverse of [`FormSchema::decode`] for round-trippable values.
    pub fn encode(&self, value: &Value) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for spec in &self.fields {
            let Value::Object(root) = value else { break };
            if let Some(found) = lookup_path(root, &spec.path) {
                serializer.append_pair(&spec.path, &spec.kind.render(found));
            }
        }
        serializer.finish()
    }
}

/// Decode without a schema: every value stays a string, repeated keys become
/// arrays, dotted keys nest. Used when a method declares no form shape.
pub fn decode_loose(bytes: &[u8]) -> Value {
    let mut root = Map::new();
    for (key, raw) in form_urlencoded::parse(bytes) {
        insert_path(&mut root, &key, Value::String(raw.into_owned()));
    }
    Value::Object(root)
}

fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            match current.get_mut(segment) {
                // Repeated key: accumulate into an array.
                Some(Value::Array(items)) => match value {
                    Value::Array(new_items) => items.extend(new_items),
                    other => items.push(other),
                },
                Some(existing) => {
                    let previous = existing.take();
                    *existing = Value::Array(vec![previous, value]);
                }
                None => {
                    current.insert(segment.to_string(), value);
                }
            }
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(map) => current = map,
            // A scalar collided with a nested path; the nested write wins.
            other => {
                *other = Value::Object(Map::new());
                match other {
                    Value::Object(map) => current = map,
                    _ => unreachable!(),
                }
            }
        }
    }
}

fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let found = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(found);
        }
        current = found.as_object()?;
    }
    None
}
