//! Fuzz testing for canonical request hashing.
//!
//! For any JSON document the fingerprint must be independent of how the
//! document was encoded: re-parsing the canonical form yields the same digest,
//! and an integral number hashes the same whether written as `n` or `n.0`.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_hashing
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use mailer_guard::hashing::{DIGEST_HEX_LEN, canonicalize, hash_object};
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let digest = hash_object(&value);
    assert_eq!(digest.len(), DIGEST_HEX_LEN);

    let canonical = canonicalize(&value);
    let reparsed: Value = serde_json::from_str(&canonical).expect("canonical form is valid JSON");
    assert_eq!(hash_object(&reparsed), digest);
    assert_eq!(canonicalize(&reparsed), canonical);

    // Integers below 2^53 survive the round trip through f64 exactly
    if let Some(i) = value.as_i64().filter(|i| i.unsigned_abs() < 1 << 53) {
        let as_float: Value = serde_json::from_str(&format!("{i}.0")).expect("valid float");
        assert_eq!(hash_object(&as_float), digest);
    }
});
