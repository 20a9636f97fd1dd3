//! JSON ↔ BSON conversion
//!
//! Encoding turns a parsed request body into a BSON [`Document`] with a few
//! wire conventions applied:
//!
//! - integers that fit in 32 bits become `Int32`, wider ones `Int64`
//! - strings written as `/pattern/flags` become regular expressions
//! - a string under the `_id` key becomes an [`ObjectId`]
//! - in insert mode, keys starting with `$` are dropped at every depth
//!
//! Decoding renders documents returned by the store as a JSON array, keeping
//! the store's order. Store-native types without a JSON counterpart use the
//! `$`-prefixed extended JSON shapes (`{"$oid": ...}`, `{"$regex": ...}`).

use bson::{oid::ObjectId, Bson, Document, Regex};
use serde_json::{json, Map, Value};

use crate::error::ErrorRecord;

/// Key holding the document identifier
pub const ID_KEY: &str = "_id";

/// Prefix reserved for store operators
pub const OPERATOR_PREFIX: char = '$';

/// Flags accepted after the closing slash of a regex literal
pub const REGEX_FLAGS: &str = "ilmsux";

/// Encode one JSON value found under `key`
///
/// Returns `None` when the value has no BSON representation; callers drop such
/// fields instead of failing the request.
pub fn encode(value: &Value, key: &str, insert_mode: bool) -> Option<Bson> {
    match value {
        Value::Null => Some(Bson::Null),
        Value::Bool(b) => Some(Bson::Boolean(*b)),
        Value::Number(n) => encode_number(n),
        Value::String(s) if key == ID_KEY => Some(encode_identifier(s)),
        Value::String(s) => Some(encode_string(s)),
        Value::Object(map) => Some(Bson::Document(encode_document(map, insert_mode))),
        Value::Array(items) => Some(Bson::Array(
            items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| encode(item, &index.to_string(), insert_mode))
                .collect(),
        )),
    }
}

/// Encode a JSON object into a document, preserving key order
pub fn encode_document(map: &Map<String, Value>, insert_mode: bool) -> Document {
    let mut document = Document::new();
    for (key, value) in map {
        if insert_mode && key.starts_with(OPERATOR_PREFIX) {
            tracing::trace!(key = %key, "Dropping operator-prefixed key from insert");
            continue;
        }
        if let Some(encoded) = encode(value, key, insert_mode) {
            document.insert(key.clone(), encoded);
        }
    }
    document
}

fn encode_number(n: &serde_json::Number) -> Option<Bson> {
    if let Some(i) = n.as_i64() {
        return Some(match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        });
    }
    // Unsigned values above i64::MAX have no integer BSON type
    if let Some(u) = n.as_u64() {
        return Some(Bson::Double(u as f64));
    }
    n.as_f64().map(Bson::Double)
}

fn encode_string(s: &str) -> Bson {
    match parse_regex_literal(s) {
        Some((pattern, options)) => Bson::RegularExpression(Regex {
            pattern: pattern.to_string(),
            options: options.to_string(),
        }),
        None => Bson::String(s.to_string()),
    }
}

fn encode_identifier(s: &str) -> Bson {
    match ObjectId::parse_str(s) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(e) => {
            tracing::debug!("Keeping _id {:?} as a string: {}", s, e);
            Bson::String(s.to_string())
        }
    }
}

/// Split a `/pattern/flags` literal into its pattern and flags
///
/// The pattern ends at the first `/` not preceded by a backslash. Everything
/// after it must be flag characters, otherwise the string is not a literal.
pub fn parse_regex_literal(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix('/')?;
    let mut escaped = false;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            '/' if !escaped => {
                let pattern = &rest[..idx];
                let flags = &rest[idx + 1..];
                return flags
                    .chars()
                    .all(|c| REGEX_FLAGS.contains(c))
                    .then_some((pattern, flags));
            }
            _ => escaped = false,
        }
    }
    None
}

/// Parse a POST body into a document ready for insertion
pub fn document_from_body(body: &[u8]) -> Result<Document, ErrorRecord> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ErrorRecord::bad_body("Request body is empty"));
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ErrorRecord::bad_body(format!("Request body is not valid JSON: {}", e)))?;

    match value {
        Value::Object(map) => Ok(encode_document(&map, true)),
        other => Err(ErrorRecord::bad_body(format!(
            "Request body must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Render documents as a JSON array in the order given
pub fn decode(documents: Vec<Document>) -> Value {
    Value::Array(documents.into_iter().map(document_to_json).collect())
}

/// Render one document as a JSON object
pub fn document_to_json(document: Document) -> Value {
    Value::Object(
        document
            .into_iter()
            .map(|(key, value)| (key, bson_to_json(value)))
            .collect(),
    )
}

/// Render one BSON value as JSON
pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::from(i),
        Bson::Int64(i) => Value::from(i),
        Bson::Double(f) if f.is_finite() => Value::from(f),
        Bson::String(s) => Value::String(s),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(doc) => document_to_json(doc),
        Bson::ObjectId(oid) => json!({ "$oid": oid.to_hex() }),
        Bson::RegularExpression(re) => json!({ "$regex": re.pattern, "$options": re.options }),
        other => other.into_relaxed_extjson(),
    }
}
