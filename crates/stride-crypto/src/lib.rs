/// Stride Crypto Library
///
/// Key material and payload encryption for direct messages:
/// - AES-256-GCM payload encryption with a fresh 96-bit IV per call
/// - X25519 key pairs for wrapping per-message keys
/// - Base64 export/import of every key type

pub mod encrypt;
pub mod error;
pub mod keys;
pub mod wrap;

pub use error::CryptoError;
pub use keys::{KeyPair, PrivateKey, PublicKey, SymmetricKey};
