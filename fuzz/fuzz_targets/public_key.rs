//! Fuzz target for public key parsing and signature verification
//!
//! Arbitrary hex strings, key bytes and signatures must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use veil_relay::PublicKey;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(key) = s.parse::<PublicKey>() {
            assert_eq!(key.to_string(), s.trim().to_lowercase());
        }
    }

    if data.len() >= 32 {
        let (key, rest) = data.split_at(32);
        if let Some(key) = PublicKey::from_slice(key) {
            let split = rest.len().min(64);
            let (signature, message) = rest.split_at(split);
            let _ = key.verify(message, signature);
        }
    }
});
