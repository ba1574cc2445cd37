//! # Canonical JSON
//!
//! Deterministic JSON rendering with lexicographically sorted object keys,
//! per the [JSON Canonicalization Scheme](https://identity.foundation/JCS/).
//! Used for directory submission bodies, notably on the tombstone fallback
//! path. This is not the signing encoding; operations sign over DAG-CBOR
//! ([`crate::dagcbor`]).

use anyhow::anyhow;
use olpc_cjson::CanonicalFormatter;
use serde::Serialize;

use crate::error::Result;

/// Render `data` as a canonical JSON string.
///
/// # Errors
///
/// Returns an error if the data cannot be serialized.
pub fn json_string(data: &impl Serialize) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
    data.serialize(&mut ser).map_err(|e| anyhow!("canonical JSON serialization failed: {e}"))?;
    Ok(String::from_utf8(buf).map_err(|e| anyhow!("canonical JSON is not UTF-8: {e}"))?)
}
