//! # Deterministic DAG-CBOR
//!
//! Canonical binary encoding for operation payloads. `ciborium` supplies
//! definite-length items and shortest-form headers. Map keys are sorted at
//! every level: lexicographic over the raw UTF-8 bytes of the key, with a
//! key that is a strict prefix of another sorting first.

use ciborium::Value;

use crate::error::{Error, Result};

/// Serialize a value as deterministic DAG-CBOR bytes.
///
/// # Errors
///
/// Returns [`Error::CborEncoding`] if the writer fails. The operation model
/// only uses text, null, arrays, and maps, so no failure is expected.
pub fn encode(value: Value) -> Result<Vec<u8>> {
    let canonical = canonicalize(value);
    let mut bytes = Vec::new();
    ciborium::into_writer(&canonical, &mut bytes)
        .map_err(|e| Error::CborEncoding(e.to_string()))?;
    Ok(bytes)
}

// Sort maps recursively. Insertion order of the input is irrelevant.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Map(entries) => {
            let mut entries: Vec<(Value, Value)> = entries
                .into_iter()
                .map(|(key, value)| (canonicalize(key), canonicalize(value)))
                .collect();
            entries.sort_by(|(a, _), (b, _)| key_bytes(a).cmp(key_bytes(b)));
            Value::Map(entries)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

// Map keys in PLC operations are always text.
fn key_bytes(key: &Value) -> &[u8] {
    match key {
        Value::Text(s) => s.as_bytes(),
        Value::Bytes(b) => b,
        _ => &[],
    }
}
