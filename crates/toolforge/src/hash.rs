//! Canonical JSON and content hashing.
//!
//! Provenance hashes must be bit-exact across runs:
//! - `stable_json` serializes with object keys sorted lexicographically, so
//!   the same logical value always produces the same bytes.
//! - `call_id` is the leading 16 hex characters of SHA-256 over
//!   `tool_id:version:<ISO-8601 UTC timestamp>`.
//! - `input_hash`/`result_hash` are full SHA-256 hex digests over the stable
//!   JSON form, with a string-form fallback for non-JSON results.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Timestamp format used for call ids: microsecond precision, UTC, `Z` suffix.
pub const CALL_ID_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Serialize a JSON value with object keys sorted lexicographically at every
/// nesting level. Arrays keep their order.
pub fn stable_json(value: &Value) -> String {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), canonicalize(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }

    // Serialization of a Value cannot fail.
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

/// SHA-256 of arbitrary bytes, hex encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash of a JSON input for provenance: SHA-256 over its stable form.
pub fn input_hash(input: &Value) -> String {
    sha256_hex(stable_json(input).as_bytes())
}

/// Hash of a call result. JSON-serializable results hash their stable JSON
/// form; anything else falls back to its string form.
pub fn result_hash(result: &Value) -> String {
    input_hash(result)
}

/// Hash of a non-JSON result's string form.
pub fn result_hash_str(result: &str) -> String {
    sha256_hex(result.as_bytes())
}

/// Format a timestamp the way call ids expect it.
pub fn call_id_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(CALL_ID_TIMESTAMP_FORMAT).to_string()
}

/// Derive a call id: the leading 16 hex characters of SHA-256 over
/// `tool_id:version:timestamp`.
pub fn call_id(tool_id: &str, version: &str, started_at: DateTime<Utc>) -> String {
    let combined = format!("{tool_id}:{version}:{}", call_id_timestamp(started_at));
    sha256_hex(combined.as_bytes())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stable_json_sorts_keys() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"d": 2, "c": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"c": 3, "d": 2}, "b": 1}"#).unwrap();
        assert_eq!(stable_json(&a), stable_json(&b));
        assert_eq!(stable_json(&a), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_stable_json_preserves_array_order() {
        let v: Value = serde_json::from_str(r#"{"items": [3, 1, 2]}"#).unwrap();
        assert_eq!(stable_json(&v), r#"{"items":[3,1,2]}"#);
    }

    #[test]
    fn test_input_hash_insertion_order_independent() {
        let a: Value = serde_json::from_str(r#"{"text": "hi", "lang": "fr"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"lang": "fr", "text": "hi"}"#).unwrap();
        assert_eq!(input_hash(&a), input_hash(&b));
    }

    #[test]
    fn test_call_id_is_16_hex() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let id = call_id("translate_text", "1.2.3", ts);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_call_id_deterministic_and_timestamp_sensitive() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let a = call_id("translate_text", "1.2.3", ts);
        let b = call_id("translate_text", "1.2.3", ts);
        assert_eq!(a, b);

        let later = ts + chrono::Duration::microseconds(1);
        assert_ne!(a, call_id("translate_text", "1.2.3", later));
    }

    #[test]
    fn test_result_hash_string_fallback() {
        let hash = result_hash_str("plain text result");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, sha256_hex(b"plain text result"));
    }
}
