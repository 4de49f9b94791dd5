//! Canonical JSON encoding and SHA-256 digests for audit keys.
//!
//! Object keys are sorted recursively and integer-valued floats are written
//! as integers, so logically equal inputs hash the same regardless of map
//! insertion order or `1` vs `1.0`.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        Value::Number(n) => Value::Number(normalize_number(n)),
        other => other.clone(),
    }
}

fn normalize_number(n: &Number) -> Number {
    if n.is_i64() || n.is_u64() {
        return n.clone();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            Number::from(f as i64)
        }
        _ => n.clone(),
    }
}

/// Compact JSON with recursively sorted keys.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest of the canonical encoding of `inputs`.
pub fn hash_inputs(inputs: &Value) -> String {
    sha256_hex(canonical_json(inputs).as_bytes())
}
