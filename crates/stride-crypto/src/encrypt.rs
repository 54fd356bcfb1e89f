use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};

use crate::error::CryptoError;
use crate::keys::{SymmetricKey, random_bytes};

pub const IV_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// Fresh 96-bit AES-GCM nonce.
///
/// Not `Clone`: `encrypt` consumes it, so one value can seal one payload.
#[derive(Debug, PartialEq, Eq)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self(random_bytes()?))
    }

    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }
}

/// Encrypt a plaintext payload with AES-256-GCM. Returns ciphertext + tag.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey, iv: Iv) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Nonce::from_slice(&iv.0);

    cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encryption)
}

/// Decrypt a ciphertext produced by [`encrypt`].
pub fn decrypt(ciphertext: &[u8], key: &SymmetricKey, iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_SIZE || ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Decryption);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Nonce::from_slice(iv);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Decryption)
}
