//! Canonical request fingerprinting.
//!
//! Two request bodies that differ only in the order of their object keys must
//! produce the same fingerprint, otherwise a client retrying with a re-encoded
//! (but otherwise identical) payload would be reported as a conflict.
//!
//! # Canonical Form
//!
//! - Object keys are sorted lexicographically (by UTF-8 bytes), recursively
//! - Array element order is preserved and significant
//! - Numbers with no fractional part are written as integers, so `100`,
//!   `100.0` and `1e2` are the same value; `-0.0` is written as `0`
//! - Other scalars are serialized exactly as `serde_json` renders them
//!
//! The canonical form is built explicitly rather than relying on the ordering
//! of `serde_json::Map`, which becomes insertion-ordered as soon as any crate in
//! the build enables serde_json's `preserve_order` feature.
//!
//! # Digest
//!
//! SHA-256, rendered as 64 lowercase hex characters. There is no seed, so
//! digests are stable across processes and restarts.

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// Length of a rendered digest in hex characters.
pub const DIGEST_HEX_LEN: usize = 64;

/// Fingerprint a structured value after sorting object keys recursively.
///
/// # Example
///
/// ```
/// use mailer_guard::hashing::hash_object;
/// use serde_json::json;
///
/// assert_eq!(hash_object(&json!({"a": 1, "b": 2})), hash_object(&json!({"b": 2, "a": 1})));
/// assert_ne!(hash_object(&json!({"items": [1, 2]})), hash_object(&json!({"items": [2, 1]})));
/// ```
pub fn hash_object(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    hash_string(&canonical)
}

/// Fingerprint a plain string.
pub fn hash_string(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Render the canonical (key-sorted, compact) JSON form of a value.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (i, (key, nested)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(nested, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, nested) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(nested, out);
            }
            out.push(']');
        }
        Value::Number(number) => write_number(number, out),
        // Remaining scalars have exactly one compact rendering.
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_number(number: &Number, out: &mut String) {
    if number.is_f64()
        && let Some(f) = number.as_f64()
        && f.is_finite()
        && f.fract() == 0.0
    {
        // i64::MAX as f64 rounds up to 2^63, hence the strict bounds.
        if f >= i64::MIN as f64 && f < i64::MAX as f64 {
            out.push_str(&(f as i64).to_string());
            return;
        }
        if f >= 0.0 && f < u64::MAX as f64 {
            out.push_str(&(f as u64).to_string());
            return;
        }
    }
    out.push_str(&number.to_string());
}

fn write_string(s: &str, out: &mut String) {
    // Serializing a &str into JSON cannot fail; the fallback keeps the
    // function total without panicking.
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        assert_eq!(
            hash_object(&json!({"a": 1, "b": 2})),
            hash_object(&json!({"b": 2, "a": 1}))
        );
    }

    #[test]
    fn test_nested_key_order_does_not_matter() {
        let a = json!({"to": ["x@example.com"], "meta": {"z": true, "a": [ {"k": 1, "j": 2} ]}});
        let b = json!({"meta": {"a": [ {"j": 2, "k": 1} ], "z": true}, "to": ["x@example.com"]});
        assert_eq!(hash_object(&a), hash_object(&b));
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            hash_object(&json!({"items": [1, 2]})),
            hash_object(&json!({"items": [2, 1]}))
        );
    }

    #[test]
    fn test_different_values_differ() {
        assert_ne!(
            hash_object(&json!({"amount": 100})),
            hash_object(&json!({"amount": 200}))
        );
    }

    #[test]
    fn test_canonical_form() {
        let value = json!({"b": [3, {"d": null, "c": "x"}], "a": 1.5});
        assert_eq!(canonicalize(&value), r#"{"a":1.5,"b":[3,{"c":"x","d":null}]}"#);
    }

    #[test]
    fn test_integral_floats_hash_like_integers() {
        let integer = hash_object(&json!({"amount": 100}));
        assert_eq!(hash_object(&json!({"amount": 100.0})), integer);

        let parsed: Value = serde_json::from_str(r#"{"amount":1e2}"#).unwrap();
        assert_eq!(hash_object(&parsed), integer);

        assert_eq!(canonicalize(&json!([-0.0, 0.0, 0, -7.0])), "[0,0,0,-7]");
    }

    #[test]
    fn test_fractional_numbers_keep_their_value() {
        assert_ne!(
            hash_object(&json!({"amount": 100.5})),
            hash_object(&json!({"amount": 100}))
        );
        assert_eq!(canonicalize(&json!({"amount": 100.5})), r#"{"amount":100.5}"#);
        assert_eq!(canonicalize(&json!(u64::MAX)), u64::MAX.to_string());
    }

    #[test]
    fn test_canonical_form_escapes_keys() {
        let value = json!({"quote\"key": "line\nbreak"});
        assert_eq!(canonicalize(&value), r#"{"quote\"key":"line\nbreak"}"#);
    }

    #[test]
    fn test_digest_shape() {
        let digest = hash_object(&json!({"amount": 100}));
        assert_eq!(digest.len(), DIGEST_HEX_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_string_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            hash_string("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_object_matches_hash_of_canonical_string() {
        let value = json!({"b": 2, "a": 1});
        assert_eq!(hash_object(&value), hash_string(r#"{"a":1,"b":2}"#));
    }
}
