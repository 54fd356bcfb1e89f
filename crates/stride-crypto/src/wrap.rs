//! Wrapping a per-message symmetric key for a recipient's X25519 public key.
//!
//! KEK = HKDF-SHA256(salt = ephemeral_pub || recipient_pub, ikm = X25519(eph, recipient),
//!                   info = "stride-key-wrap")
//!
//! Wire format: ephemeral_pub(32) + IV(12) + AES-256-GCM(content key) + tag(16)

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::encrypt::{IV_SIZE, Iv, TAG_SIZE, decrypt, encrypt};
use crate::error::CryptoError;
use crate::keys::{KEY_SIZE, PrivateKey, PublicKey, SymmetricKey, random_bytes};

const WRAP_INFO: &[u8] = b"stride-key-wrap";
const WRAPPED_LEN: usize = KEY_SIZE + IV_SIZE + KEY_SIZE + TAG_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub ephemeral_public: [u8; KEY_SIZE],
    pub iv: [u8; IV_SIZE],
    pub ciphertext: Vec<u8>,
}

impl WrappedKey {
    pub fn to_base64(&self) -> String {
        let mut out = Vec::with_capacity(WRAPPED_LEN);
        out.extend_from_slice(&self.ephemeral_public);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        BASE64.encode(out)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::KeyFormat(format!("wrapped key: {e}")))?;
        if bytes.len() != WRAPPED_LEN {
            return Err(CryptoError::KeyFormat(format!(
                "wrapped key must be {WRAPPED_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        let mut ephemeral_public = [0u8; KEY_SIZE];
        ephemeral_public.copy_from_slice(&bytes[..KEY_SIZE]);
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[KEY_SIZE..KEY_SIZE + IV_SIZE]);

        Ok(Self {
            ephemeral_public,
            iv,
            ciphertext: bytes[KEY_SIZE + IV_SIZE..].to_vec(),
        })
    }
}

/// Encrypt `key` so only the holder of `recipient`'s private key can recover it.
pub fn wrap_symmetric_key(
    recipient: &PublicKey,
    key: &SymmetricKey,
) -> Result<WrappedKey, CryptoError> {
    let ephemeral = PrivateKey::from_bytes(random_bytes()?);
    let ephemeral_public = ephemeral.public_key();

    let kek = derive_kek(&ephemeral, recipient, &ephemeral_public, recipient)
        .ok_or_else(|| CryptoError::KeyFormat("recipient public key is a low-order point".into()))?;

    let iv = Iv::generate()?;
    let iv_bytes = *iv.as_bytes();
    let ciphertext = encrypt(key.as_bytes(), &kek, iv)?;

    Ok(WrappedKey {
        ephemeral_public: *ephemeral_public.as_bytes(),
        iv: iv_bytes,
        ciphertext,
    })
}

/// Recover a key produced by [`wrap_symmetric_key`].
pub fn unwrap_symmetric_key(
    private: &PrivateKey,
    wrapped: &WrappedKey,
) -> Result<SymmetricKey, CryptoError> {
    let ephemeral_public = PublicKey::from_bytes(wrapped.ephemeral_public);
    let kek = derive_kek(private, &ephemeral_public, &ephemeral_public, &private.public_key())
        .ok_or(CryptoError::Decryption)?;

    let plaintext = decrypt(&wrapped.ciphertext, &kek, &wrapped.iv)?;
    let bytes: [u8; KEY_SIZE] = plaintext.try_into().map_err(|_| CryptoError::Decryption)?;
    Ok(SymmetricKey::from_bytes(bytes))
}

/// Returns `None` if the agreement is non-contributory.
fn derive_kek(
    secret: &PrivateKey,
    peer: &PublicKey,
    ephemeral_public: &PublicKey,
    recipient_public: &PublicKey,
) -> Option<SymmetricKey> {
    let shared = secret.inner().diffie_hellman(peer.inner());
    if !shared.was_contributory() {
        return None;
    }

    let mut salt = [0u8; KEY_SIZE * 2];
    salt[..KEY_SIZE].copy_from_slice(ephemeral_public.as_bytes());
    salt[KEY_SIZE..].copy_from_slice(recipient_public.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut kek = [0u8; KEY_SIZE];
    hk.expand(WRAP_INFO, &mut kek).ok()?;
    Some(SymmetricKey::from_bytes(kek))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_asymmetric_key_pair, generate_symmetric_key};

    #[test]
    fn wrap_unwrap_roundtrip() {
        let recipient = generate_asymmetric_key_pair().unwrap();
        let key = generate_symmetric_key().unwrap();

        let wrapped = wrap_symmetric_key(&recipient.public, &key).unwrap();
        let unwrapped = unwrap_symmetric_key(&recipient.private, &wrapped).unwrap();
        assert_eq!(unwrapped, key);
    }

    #[test]
    fn base64_form_roundtrips() {
        let recipient = generate_asymmetric_key_pair().unwrap();
        let key = generate_symmetric_key().unwrap();

        let wrapped = wrap_symmetric_key(&recipient.public, &key).unwrap();
        let parsed = WrappedKey::from_base64(&wrapped.to_base64()).unwrap();
        assert_eq!(parsed, wrapped);
        assert_eq!(unwrap_symmetric_key(&recipient.private, &parsed).unwrap(), key);
    }

    #[test]
    fn other_private_key_cannot_unwrap() {
        let recipient = generate_asymmetric_key_pair().unwrap();
        let eavesdropper = generate_asymmetric_key_pair().unwrap();
        let key = generate_symmetric_key().unwrap();

        let wrapped = wrap_symmetric_key(&recipient.public, &key).unwrap();
        let err = unwrap_symmetric_key(&eavesdropper.private, &wrapped).unwrap_err();
        assert!(matches!(err, CryptoError::Decryption));
    }

    #[test]
    fn low_order_recipient_is_rejected() {
        let key = generate_symmetric_key().unwrap();
        let identity_point = PublicKey::from_bytes([0u8; KEY_SIZE]);
        let err = wrap_symmetric_key(&identity_point, &key).unwrap_err();
        assert!(matches!(err, CryptoError::KeyFormat(_)));
    }

    #[test]
    fn truncated_wrapped_key_is_rejected() {
        let err = WrappedKey::from_base64(&BASE64.encode([0u8; 40])).unwrap_err();
        assert!(matches!(err, CryptoError::KeyFormat(_)));
    }
}
