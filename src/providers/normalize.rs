//! Credential Payload Decoding
//!
//! Parameter values are written by several tools over the years, so the
//! same JSON document may arrive plain, JSON-encoded as a string (once or
//! twice), escaped without its outer quotes, or base64-encoded.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde_json::{Map, Value};

use crate::error::ScanError;

/// How many string layers are peeled before giving up
const MAX_STRING_LAYERS: usize = 3;

/// Decode a service-account key document.
///
/// Tried in order, first JSON object wins:
/// 1. escaped leading quote-brace (`"{\"...` or `{\"...`), unwrapped
/// 2. direct JSON parse (string layers peeled)
/// 3. base64 decode, then JSON
///
/// Anything else is [`ScanError::InvalidCredentialFormat`].
pub fn normalize_key_document(raw: &str) -> Result<Map<String, Value>, ScanError> {
    let trimmed = raw.trim();

    if let Some(doc) = unwrap_escaped(trimmed) {
        return Ok(doc);
    }

    if let Some(doc) = serde_json::from_str(trimmed)
        .ok()
        .and_then(|v| into_object(v, MAX_STRING_LAYERS))
    {
        return Ok(doc);
    }

    if let Some(doc) = decode_base64(trimmed)
        .and_then(|text| serde_json::from_str(text.trim()).ok())
        .and_then(|v| into_object(v, MAX_STRING_LAYERS))
    {
        return Ok(doc);
    }

    Err(ScanError::InvalidCredentialFormat(format!(
        "payload of {} bytes is neither JSON, JSON-encoded JSON nor base64 JSON",
        raw.len()
    )))
}

/// Decode a blob that is JSON, or JSON encoded as a string.
///
/// A value that does not parse is returned as a plain string.
pub fn decode_json_layers(raw: &str) -> Value {
    let trimmed = raw.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => peel_strings(value, MAX_STRING_LAYERS),
        Err(_) => Value::String(trimmed.to_string()),
    }
}

fn unwrap_escaped(s: &str) -> Option<Map<String, Value>> {
    let inner = if s.starts_with("\"{") {
        serde_json::from_str::<String>(s).ok()?
    } else if s.starts_with("{\\\"") {
        // Escaped document missing its outer quotes
        serde_json::from_str::<String>(&format!("\"{}\"", s)).ok()?
    } else {
        return None;
    };

    serde_json::from_str(inner.trim())
        .ok()
        .and_then(|v| into_object(v, MAX_STRING_LAYERS))
}

fn peel_strings(value: Value, layers: usize) -> Value {
    match value {
        Value::String(s) if layers > 0 => match serde_json::from_str::<Value>(s.trim()) {
            Ok(inner) => peel_strings(inner, layers - 1),
            Err(_) => Value::String(s),
        },
        other => other,
    }
}

fn into_object(value: Value, layers: usize) -> Option<Map<String, Value>> {
    match peel_strings(value, layers) {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn decode_base64(s: &str) -> Option<String> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    let bytes = STANDARD
        .decode(&compact)
        .or_else(|_| URL_SAFE.decode(&compact))
        .ok()?;
    String::from_utf8(bytes).ok()
}
