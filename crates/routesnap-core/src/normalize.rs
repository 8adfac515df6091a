//! Normalization of raw device values into canonical forms
//!
//! Pure functions. Everything here must be deterministic across runs and
//! platforms: snapshots taken by different collector instances have to be
//! byte-comparable.

use crate::error::{Error, Result};
use crate::rows::Afi;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Normalize a raw community attribute into a sorted, deduplicated token
/// list.
///
/// Accepts a whitespace-separated string, a list of strings/ints, or null.
pub fn normalize_communities(raw: &Value) -> Vec<String> {
    let mut tokens: Vec<String> = match raw {
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
                Value::Number(n) => vec![n.to_string()],
                _ => vec![],
            })
            .collect(),
        _ => vec![],
    };
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Deterministic digest over a normalized community list: SHA-256 of each
/// token followed by a 0x00 separator, hex-encoded.
pub fn community_hash(tokens: &[String]) -> String {
    let mut hasher = Sha256::new();
    for token in tokens {
        hasher.update(token.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Normalize an AS path into a single-space-separated string.
///
/// Lists are joined; runs of whitespace collapse. `{...}` aggregates and
/// `(...)` confederation segments pass through as tokens.
pub fn normalize_as_path(raw: &Value) -> String {
    let joined = match raw {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    };
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The leftmost purely numeric token of an AS path (the upstream AS), or
/// `""` when the path is empty or starts with an aggregate/confed segment.
pub fn head_as(as_path: &str) -> &str {
    match as_path.split_whitespace().next() {
        Some(tok) if !tok.is_empty() && tok.bytes().all(|b| b.is_ascii_digit()) => tok,
        _ => "",
    }
}

/// Canonicalize a prefix: lowercase, mask present, host bits zeroed.
///
/// Bare addresses get a full-length mask for their family.
pub fn normalize_prefix(raw: &str, afi: Afi) -> Result<String> {
    let trimmed = raw.trim();
    if let Ok(net) = trimmed.parse::<IpNet>() {
        return Ok(net.trunc().to_string());
    }
    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => {
            // Host route; prefix length is implied by the address family.
            let net = Ipv4Net::new(addr, 32).map_err(|e| Error::InvalidPrefix {
                prefix: raw.to_string(),
                reason: e.to_string(),
            })?;
            Ok(net.to_string())
        }
        Ok(IpAddr::V6(addr)) => {
            let net = Ipv6Net::new(addr, 128).map_err(|e| Error::InvalidPrefix {
                prefix: raw.to_string(),
                reason: e.to_string(),
            })?;
            Ok(net.to_string())
        }
        Err(e) => Err(Error::InvalidPrefix {
            prefix: raw.to_string(),
            reason: format!("{} ({})", e, afi),
        }),
    }
}

/// Boolean coercion across device dialects: `true`, `1`, and `"true"` (any
/// case) are truthy.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_communities_from_string_and_list() {
        let from_str = normalize_communities(&json!("65001:200 65001:100 65001:100"));
        assert_eq!(from_str, vec!["65001:100", "65001:200"]);

        let from_list = normalize_communities(&json!(["65001:200", "65001:100"]));
        assert_eq!(from_list, from_str);

        assert!(normalize_communities(&Value::Null).is_empty());
    }

    #[test]
    fn test_communities_idempotent() {
        let once = normalize_communities(&json!("65001:300 65001:100  65001:200"));
        let twice = normalize_communities(&json!(once.clone()));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_community_hash_order_insensitive() {
        let a = normalize_communities(&json!("65001:100 65001:200"));
        let b = normalize_communities(&json!("65001:200 65001:100"));
        assert_eq!(community_hash(&a), community_hash(&b));

        let c = normalize_communities(&json!("65001:100 65001:300"));
        assert_ne!(community_hash(&a), community_hash(&c));
    }

    #[test]
    fn test_community_hash_separator_is_unambiguous() {
        // Without the 0x00 separator these two would collide.
        let a = vec!["1:23".to_string(), "4:5".to_string()];
        let b = vec!["1:2".to_string(), "34:5".to_string()];
        assert_ne!(community_hash(&a), community_hash(&b));
    }

    #[test]
    fn test_as_path_normalization() {
        assert_eq!(normalize_as_path(&json!("65001   3356  1299")), "65001 3356 1299");
        assert_eq!(normalize_as_path(&json!([65001, 3356])), "65001 3356");
        assert_eq!(normalize_as_path(&json!("65001 {64512,64513}")), "65001 {64512,64513}");
        assert_eq!(normalize_as_path(&Value::Null), "");
    }

    #[test]
    fn test_head_as() {
        assert_eq!(head_as("65001 3356"), "65001");
        assert_eq!(head_as("{64512} 3356"), "");
        assert_eq!(head_as(""), "");
        assert_eq!(head_as("  65001"), "65001");
    }

    #[test]
    fn test_prefix_canonicalization() {
        assert_eq!(
            normalize_prefix("10.0.0.5/24", Afi::Ipv4).unwrap(),
            "10.0.0.0/24"
        );
        assert_eq!(normalize_prefix("10.0.0.5", Afi::Ipv4).unwrap(), "10.0.0.5/32");
        assert_eq!(
            normalize_prefix("2001:DB8::1/32", Afi::Ipv6).unwrap(),
            "2001:db8::/32"
        );
        assert_eq!(normalize_prefix("::1", Afi::Ipv6).unwrap(), "::1/128");
        assert!(normalize_prefix("not-a-prefix", Afi::Ipv4).is_err());
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("true")));
        assert!(truthy(&json!("True")));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("false")));
        assert!(!truthy(&Value::Null));
    }
}
