use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid key material: {0}")]
    KeyFormat(String),

    #[error("Encryption failed")]
    Encryption,

    /// Wrong key, bad IV, tag mismatch and corrupt input all collapse here.
    #[error("Decryption failed")]
    Decryption,
}
