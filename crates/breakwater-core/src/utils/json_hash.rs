//! Deterministic JSON hashing for cache keys.
//!
//! Traverses `serde_json::Value` structures directly instead of serializing to
//! strings, so hashing a request's params allocates nothing. Object keys are
//! sorted before hashing so `{"a":1,"b":2}` and `{"b":2,"a":1}` produce the
//! same key.

use ahash::AHasher;
use serde_json::Value;
use std::hash::{Hash, Hasher};

/// Computes the cache key for a request: a 64-bit hash over
/// (chain id, method, canonicalized params).
///
/// Two requests differing only in JSON object key order map to the same key;
/// requests for different chains never collide by construction of the input.
#[must_use]
pub fn cache_key(chain_id: u64, method: &str, params: Option<&Value>) -> u64 {
    let mut hasher = AHasher::default();
    chain_id.hash(&mut hasher);
    method.hash(&mut hasher);
    match params {
        Some(value) => hash_json_value(value, &mut hasher),
        None => 0u8.hash(&mut hasher),
    }
    hasher.finish()
}

/// Hashes a `serde_json::Value` directly without serialization.
///
/// Each JSON type is prefixed with a discriminant byte to prevent collisions
/// between e.g. the string `"1"` and the number `1`:
/// - Null: 0, Bool: 1, Number: 2, String: 3, Array: 4, Object: 5
pub fn hash_json_value(value: &Value, hasher: &mut impl Hasher) {
    match value {
        Value::Null => {
            0u8.hash(hasher);
        }
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Number(n) => {
            2u8.hash(hasher);
            if let Some(i) = n.as_i64() {
                0u8.hash(hasher);
                i.hash(hasher);
            } else if let Some(u) = n.as_u64() {
                1u8.hash(hasher);
                u.hash(hasher);
            } else if let Some(f) = n.as_f64() {
                2u8.hash(hasher);
                // Normalize NaN and infinities so semantically equal values
                // hash identically regardless of bit pattern.
                let bits = if f.is_nan() {
                    f64::NAN.to_bits()
                } else {
                    f.to_bits()
                };
                bits.hash(hasher);
            }
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(items) => {
            4u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_json_value(item, hasher);
            }
        }
        Value::Object(map) => {
            5u8.hash(hasher);
            map.len().hash(hasher);

            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();

            for key in keys {
                key.hash(hasher);
                if let Some(value) = map.get(key) {
                    hash_json_value(value, hasher);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"fromBlock": "0x1", "toBlock": "0x2"});
        let b = json!({"toBlock": "0x2", "fromBlock": "0x1"});
        assert_eq!(cache_key(1, "eth_getLogs", Some(&a)), cache_key(1, "eth_getLogs", Some(&b)));
    }

    #[test]
    fn chain_and_method_separate_keys() {
        let params = json!(["0xabc", false]);
        assert_ne!(
            cache_key(1, "eth_getBlockByHash", Some(&params)),
            cache_key(137, "eth_getBlockByHash", Some(&params)),
        );
        assert_ne!(
            cache_key(1, "eth_getBlockByHash", Some(&params)),
            cache_key(1, "eth_getBlockByNumber", Some(&params)),
        );
    }

    #[test]
    fn type_discriminants_prevent_collisions() {
        assert_ne!(
            cache_key(1, "m", Some(&json!("1"))),
            cache_key(1, "m", Some(&json!(1))),
        );
        assert_ne!(cache_key(1, "m", Some(&json!(null))), cache_key(1, "m", None));
    }

    #[test]
    fn nested_structures_hash_stably() {
        let a = json!([{"address": "0x1", "topics": ["0xa", "0xb"]}]);
        let b = json!([{"topics": ["0xa", "0xb"], "address": "0x1"}]);
        assert_eq!(cache_key(1, "eth_getLogs", Some(&a)), cache_key(1, "eth_getLogs", Some(&b)));
    }
}
