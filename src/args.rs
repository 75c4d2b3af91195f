//! Opaque operation arguments and deterministic hashing.
//!
//! The chain never inspects argument shape; it only needs a stable byte identity
//! for cache keys and idempotency request hashes. [`Args`] wraps a
//! [`serde_json::Value`] (always `Value::Array` for positional args) and
//! [`deterministic_hash`] produces a SHA-256 digest over a canonicalized encoding
//! of it: object keys sorted, no insertion-order dependence, so two logically
//! identical argument sets always hash identically regardless of how the caller
//! built the JSON.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The operation's arguments, as an opaque ordered tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Args(pub Value);

impl Args {
    pub fn from_values(values: Vec<Value>) -> Self {
        Args(Value::Array(values))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// `sha256(deterministic-json(args))`, hex-encoded.
    pub fn deterministic_hash(&self) -> String {
        deterministic_hash(&self.0)
    }
}

/// Hash any JSON value the same way [`Args::deterministic_hash`] hashes arguments;
/// used for both the idempotency request hash and cache argument component.
pub fn deterministic_hash(value: &Value) -> String {
    let canonical = canonicalize(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Render a JSON value with map keys sorted at every level, so serialization is
/// independent of the original field insertion order. Numbers and strings are
/// rendered via `serde_json`'s own (non-nondeterministic) formatting.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let mut out = String::from("{");
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).expect("string keys always serialize"));
                out.push(':');
                out.push_str(&canonicalize(v));
            }
            out.push('}');
            out
        }
        Value::Array(items) => {
            let mut out = String::from("[");
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize(v));
            }
            out.push(']');
            out
        }
        other => serde_json::to_string(other).expect("scalar JSON always serializes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = Args(json!({"b": 1, "a": 2}));
        let b = Args(json!({"a": 2, "b": 1}));
        assert_eq!(a.deterministic_hash(), b.deterministic_hash());
    }

    #[test]
    fn different_values_hash_differently() {
        let a = Args(json!({"a": 1}));
        let b = Args(json!({"a": 2}));
        assert_ne!(a.deterministic_hash(), b.deterministic_hash());
    }

    #[test]
    fn nested_object_order_is_normalized() {
        let a = Args(json!({"outer": {"x": 1, "y": 2}}));
        let b = Args(json!({"outer": {"y": 2, "x": 1}}));
        assert_eq!(a.deterministic_hash(), b.deterministic_hash());
    }

    #[test]
    fn hash_is_stable_hex_sha256_length() {
        let a = Args::from_values(vec![json!(1), json!("two")]);
        assert_eq!(a.deterministic_hash().len(), 64);
    }
}
