use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::StaticSecret;

use crate::error::CryptoError;

pub const KEY_SIZE: usize = 32;

/// Random 256-bit key for AES-256-GCM, one per encrypted payload.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        self.0.as_bytes()
    }

    /// First 8 bytes of SHA-256 over the key, hex encoded. For logs only.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }

    pub(crate) fn inner(&self) -> &x25519_dalek::PublicKey {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

/// X25519 private key. Exportable so callers can persist it themselves.
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    pub(crate) fn inner(&self) -> &StaticSecret {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

/// Raw key bytes that can be moved to and from base64.
pub trait ExportKey {
    fn key_bytes(&self) -> [u8; KEY_SIZE];
}

impl ExportKey for SymmetricKey {
    fn key_bytes(&self) -> [u8; KEY_SIZE] {
        self.0
    }
}

impl ExportKey for PublicKey {
    fn key_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }
}

impl ExportKey for PrivateKey {
    fn key_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }
}

/// Fill `N` bytes from the OS random source.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    Ok(bytes)
}

/// Generate an X25519 key pair for wrapping per-message keys.
pub fn generate_asymmetric_key_pair() -> Result<KeyPair, CryptoError> {
    let private = PrivateKey::from_bytes(random_bytes()?);
    Ok(KeyPair {
        public: private.public_key(),
        private,
    })
}

/// Generate a random 256-bit key for AES-256-GCM.
pub fn generate_symmetric_key() -> Result<SymmetricKey, CryptoError> {
    Ok(SymmetricKey(random_bytes()?))
}

/// Encode a key to base64 for storage or transmission.
pub fn export_key<K: ExportKey>(key: &K) -> String {
    BASE64.encode(key.key_bytes())
}

pub fn import_public_key(encoded: &str) -> Result<PublicKey, CryptoError> {
    decode_key(encoded, "public key").map(PublicKey::from_bytes)
}

pub fn import_private_key(encoded: &str) -> Result<PrivateKey, CryptoError> {
    decode_key(encoded, "private key").map(PrivateKey::from_bytes)
}

pub fn import_symmetric_key(encoded: &str) -> Result<SymmetricKey, CryptoError> {
    decode_key(encoded, "symmetric key").map(SymmetricKey)
}

fn decode_key(encoded: &str, kind: &'static str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::KeyFormat(format!("{kind}: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        CryptoError::KeyFormat(format!("{kind} must be {KEY_SIZE} bytes, got {}", b.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_key_roundtrip() {
        let key = generate_symmetric_key().unwrap();
        let imported = import_symmetric_key(&export_key(&key)).unwrap();
        assert_eq!(imported, key);
    }

    #[test]
    fn key_pair_roundtrip_keeps_public_half() {
        let pair = generate_asymmetric_key_pair().unwrap();
        let private = import_private_key(&export_key(&pair.private)).unwrap();
        let public = import_public_key(&export_key(&pair.public)).unwrap();
        assert_eq!(private.public_key(), pair.public);
        assert_eq!(public, pair.public);
    }

    #[test]
    fn fresh_keys_differ() {
        let a = generate_symmetric_key().unwrap();
        let b = generate_symmetric_key().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_bad_base64() {
        let err = import_symmetric_key("not base64!!").unwrap_err();
        assert!(matches!(err, CryptoError::KeyFormat(_)));
    }

    #[test]
    fn rejects_wrong_length() {
        let short = BASE64.encode([7u8; 16]);
        let err = import_public_key(&short).unwrap_err();
        assert!(matches!(err, CryptoError::KeyFormat(_)));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let key = generate_symmetric_key().unwrap();
        assert_eq!(format!("{:?}", key), "SymmetricKey(..)");
        let pair = generate_asymmetric_key_pair().unwrap();
        assert_eq!(format!("{:?}", pair.private), "PrivateKey(..)");
        assert_eq!(pair.public.fingerprint().len(), 16);
    }
}
