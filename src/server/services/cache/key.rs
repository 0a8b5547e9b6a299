use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::server::services::upstream::scalar_text;

/// Canonical form of a cache key: parameters sorted lexicographically by
/// name, values coerced to their string form, rendered as `k=v` pairs.
/// Semantically equal calls (differing key order, `1` vs `"1"`) produce
/// byte-equal keys.
pub fn cache_key(interface: &str, params: &Map<String, Value>) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (k.clone(), scalar_text(v)))
        .collect();
    pairs.sort();

    let mut key = String::from(interface);
    for (name, value) in pairs {
        key.push('\u{1f}');
        key.push_str(&name);
        key.push('=');
        key.push_str(&value);
    }
    key
}

/// Hex-encoded SHA-256 of the canonical key, used as the on-disk file stem.
pub fn key_hash(canonical: &str) -> String {
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn key_is_order_insensitive() {
        let a = params(json!({"symbol": "600519", "period": "daily"}));
        let b = params(json!({"period": "daily", "symbol": "600519"}));
        assert_eq!(
            cache_key("stock_zh_a_hist", &a),
            cache_key("stock_zh_a_hist", &b)
        );
    }

    #[test]
    fn key_coerces_value_types() {
        let a = params(json!({"symbol": "600519"}));
        let b = params(json!({"symbol": 600519}));
        assert_eq!(cache_key("x", &a), cache_key("x", &b));
    }

    #[test]
    fn different_interfaces_differ() {
        let p = params(json!({"symbol": "600519"}));
        assert_ne!(cache_key("a", &p), cache_key("b", &p));
    }

    #[test]
    fn hash_is_stable_hex() {
        let h = key_hash("stock_zh_a_hist\u{1f}symbol=600519");
        assert_eq!(h.len(), 64);
        assert_eq!(h, key_hash("stock_zh_a_hist\u{1f}symbol=600519"));
    }
}
