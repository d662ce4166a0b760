//! Ed25519 identities.
//!
//! A [`PublicKey`] is the only address the relay understands. The all-zero
//! key is reserved as a sentinel and is never a valid source or destination.

use crate::error::HandshakeError;
use ed25519_dalek::{Signer, Verifier};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::ZeroizeOnDrop;

/// Public key length in bytes
pub const PUBLIC_KEY_LEN: usize = 32;

/// Signature length in bytes
pub const SIGNATURE_LEN: usize = 64;

/// 32-byte Ed25519 public key identifying a relay client
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// The reserved zero key
    pub const ZERO: PublicKey = PublicKey([0u8; PUBLIC_KEY_LEN]);

    /// Create from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, returning `None` unless it is exactly 32 bytes
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        slice.try_into().ok().map(Self)
    }

    /// Raw key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Whether this is the reserved zero key
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; PUBLIC_KEY_LEN]
    }

    /// Verify an Ed25519 signature made by this key.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::ZeroKey`] for the sentinel key,
    /// [`HandshakeError::InvalidKey`] if the bytes are not a curve point, and
    /// [`HandshakeError::BadSignature`] if verification fails.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), HandshakeError> {
        if self.is_zero() {
            return Err(HandshakeError::ZeroKey);
        }
        let key = ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|_| HandshakeError::InvalidKey)?;
        let signature = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| HandshakeError::BadSignature)?;
        key.verify(message, &signature)
            .map_err(|_| HandshakeError::BadSignature)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

/// Error parsing a hex-encoded public key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected 64 hex characters for a public key")]
pub struct ParseKeyError;

impl FromStr for PublicKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        hex::decode_to_slice(s.trim(), &mut bytes).map_err(|_| ParseKeyError)?;
        Ok(Self(bytes))
    }
}

/// Ed25519 secret key. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct SecretKey {
    inner: ed25519_dalek::SigningKey,
}

impl SecretKey {
    /// Generate a fresh random key from the OS RNG
    #[must_use]
    pub fn generate() -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from a 32-byte seed
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Export the seed bytes. Handle with care.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// The matching public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.inner.verifying_key().to_bytes())
    }

    /// Sign a message
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.inner.sign(message).to_bytes()
    }
}

impl Clone for SecretKey {
    fn clone(&self) -> Self {
        Self::from_bytes(&self.to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_key() {
        assert!(PublicKey::ZERO.is_zero());
        assert!(PublicKey::default().is_zero());
        assert!(!SecretKey::generate().public_key().is_zero());
    }

    #[test]
    fn test_sign_and_verify() {
        let secret = SecretKey::generate();
        let public = secret.public_key();
        let sig = secret.sign(b"challenge");

        assert!(public.verify(b"challenge", &sig).is_ok());
        assert!(matches!(
            public.verify(b"other", &sig),
            Err(HandshakeError::BadSignature)
        ));
    }

    #[test]
    fn test_verify_rejects_zero_key() {
        let secret = SecretKey::generate();
        let sig = secret.sign(b"msg");
        assert!(matches!(
            PublicKey::ZERO.verify(b"msg", &sig),
            Err(HandshakeError::ZeroKey)
        ));
    }

    #[test]
    fn test_verify_rejects_short_signature() {
        let public = SecretKey::generate().public_key();
        assert!(public.verify(b"msg", &[0u8; 10]).is_err());
    }

    #[test]
    fn test_hex_roundtrip() {
        let public = SecretKey::generate().public_key();
        let parsed: PublicKey = public.to_string().parse().unwrap();
        assert_eq!(parsed, public);

        assert_eq!("abcd".parse::<PublicKey>(), Err(ParseKeyError));
        assert_eq!("zz".repeat(32).parse::<PublicKey>(), Err(ParseKeyError));
    }

    #[test]
    fn test_secret_key_from_bytes_is_deterministic() {
        let a = SecretKey::from_bytes(&[7u8; 32]);
        let b = SecretKey::from_bytes(&[7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.clone().to_bytes(), [7u8; 32]);
    }

    #[test]
    fn test_debug_is_short() {
        let key = PublicKey::from_bytes([0xAB; 32]);
        assert_eq!(format!("{key:?}"), "PublicKey(abababababababab)");
    }
}
