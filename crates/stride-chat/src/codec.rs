//! Envelope wire codec and the pluggable payload protection step.
//!
//! With `PayloadProtection::None` the wire bytes are the envelope JSON itself.
//! Both encrypted modes wrap the envelope JSON (never `content` alone) in a
//! sealed frame:
//!
//!   { "v": 1, "iv": b64, "ciphertext": b64, "recipients": [{ "user", "wrapped" }] }
//!
//! `recipients` is only present in `Sealed` mode, where every message gets a
//! fresh content key wrapped for both the receiver and the sender.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};

use stride_crypto::encrypt::{Iv, decrypt, encrypt};
use stride_crypto::keys::{generate_symmetric_key, import_public_key};
use stride_crypto::wrap::{WrappedKey, unwrap_symmetric_key, wrap_symmetric_key};
use stride_crypto::{CryptoError, KeyPair, PublicKey, SymmetricKey};
use stride_types::Envelope;

use crate::error::CodecError;

const SEALED_FRAME_VERSION: u8 = 1;

/// Serialize an envelope to canonical UTF-8 JSON.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(|e| CodecError::MalformedEnvelope(e.to_string()))
}

/// Parse an envelope. Unknown extra fields are ignored.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::MalformedEnvelope(e.to_string()))
}

/// Public keys of the people the local user talks to.
#[derive(Debug, Clone, Default)]
pub struct KeyDirectory {
    keys: HashMap<String, PublicKey>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user: impl Into<String>, key: PublicKey) {
        self.keys.insert(user.into(), key);
    }

    /// Add a base64 public key as handed out by a profile service.
    pub fn insert_encoded(&mut self, user: impl Into<String>, encoded: &str) -> Result<(), CryptoError> {
        let key = import_public_key(encoded)?;
        self.insert(user, key);
        Ok(())
    }

    pub fn get(&self, user: &str) -> Option<&PublicKey> {
        self.keys.get(user)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// How envelope bytes are protected before they leave the device.
#[derive(Debug, Clone)]
pub enum PayloadProtection {
    /// Envelope JSON goes out as-is. Anyone on the topic can read it.
    None,
    /// One pre-shared key, fresh IV per message.
    SharedKey(SymmetricKey),
    /// Fresh key per message, wrapped for receiver and sender.
    Sealed {
        identity: KeyPair,
        directory: KeyDirectory,
    },
}

impl PayloadProtection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SharedKey(_) => "shared-key",
            Self::Sealed { .. } => "sealed",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedFrame {
    v: u8,
    iv: String,
    ciphertext: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    recipients: Vec<RecipientKey>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecipientKey {
    user: String,
    wrapped: String,
}

/// Turns envelopes into transport bytes and back under one protection mode.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    protection: PayloadProtection,
}

impl MessageCodec {
    pub fn new(protection: PayloadProtection) -> Self {
        Self { protection }
    }

    pub fn plaintext() -> Self {
        Self::new(PayloadProtection::None)
    }

    pub fn protection(&self) -> &PayloadProtection {
        &self.protection
    }

    pub fn seal(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let body = encode_envelope(envelope)?;

        match &self.protection {
            PayloadProtection::None => Ok(body),
            PayloadProtection::SharedKey(key) => seal_frame(&body, key, Vec::new()),
            PayloadProtection::Sealed { identity, directory } => {
                let receiver_key = directory
                    .get(envelope.receiver())
                    .ok_or_else(|| CodecError::MissingRecipientKey(envelope.receiver().to_string()))?;

                let content_key = generate_symmetric_key()?;
                let mut recipients = vec![RecipientKey {
                    user: envelope.receiver().to_string(),
                    wrapped: wrap_symmetric_key(receiver_key, &content_key)?.to_base64(),
                }];
                if envelope.sender() != envelope.receiver() {
                    recipients.push(RecipientKey {
                        user: envelope.sender().to_string(),
                        wrapped: wrap_symmetric_key(&identity.public, &content_key)?.to_base64(),
                    });
                }

                seal_frame(&body, &content_key, recipients)
            }
        }
    }

    pub fn open(&self, bytes: &[u8], local_user: &str) -> Result<Envelope, CodecError> {
        match &self.protection {
            PayloadProtection::None => decode_envelope(bytes),
            PayloadProtection::SharedKey(key) => {
                let frame = parse_frame(bytes)?;
                open_frame(&frame, key)
            }
            PayloadProtection::Sealed { identity, .. } => {
                let frame = parse_frame(bytes)?;
                let entry = frame
                    .recipients
                    .iter()
                    .find(|r| r.user == local_user)
                    .ok_or_else(|| CodecError::NotAddressed(local_user.to_string()))?;

                let wrapped = WrappedKey::from_base64(&entry.wrapped)?;
                let content_key = unwrap_symmetric_key(&identity.private, &wrapped)?;
                open_frame(&frame, &content_key)
            }
        }
    }
}

fn seal_frame(
    body: &[u8],
    key: &SymmetricKey,
    recipients: Vec<RecipientKey>,
) -> Result<Vec<u8>, CodecError> {
    let iv = Iv::generate()?;
    let iv_b64 = B64.encode(iv.as_bytes());
    let ciphertext = encrypt(body, key, iv)?;

    let frame = SealedFrame {
        v: SEALED_FRAME_VERSION,
        iv: iv_b64,
        ciphertext: B64.encode(ciphertext),
        recipients,
    };
    serde_json::to_vec(&frame).map_err(|e| CodecError::MalformedEnvelope(e.to_string()))
}

fn parse_frame(bytes: &[u8]) -> Result<SealedFrame, CodecError> {
    let frame: SealedFrame = serde_json::from_slice(bytes)
        .map_err(|e| CodecError::MalformedEnvelope(format!("not a sealed frame: {}", e)))?;
    if frame.v != SEALED_FRAME_VERSION {
        return Err(CodecError::MalformedEnvelope(format!(
            "unsupported frame version {}",
            frame.v
        )));
    }
    Ok(frame)
}

fn open_frame(frame: &SealedFrame, key: &SymmetricKey) -> Result<Envelope, CodecError> {
    let iv = B64
        .decode(&frame.iv)
        .map_err(|e| CodecError::MalformedEnvelope(format!("iv: {}", e)))?;
    let ciphertext = B64
        .decode(&frame.ciphertext)
        .map_err(|e| CodecError::MalformedEnvelope(format!("ciphertext: {}", e)))?;

    let body = decrypt(&ciphertext, key, &iv)?;
    decode_envelope(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stride_crypto::keys::{export_key, generate_asymmetric_key_pair};

    fn sample() -> Envelope {
        Envelope::new("1700000000000-k3j2h1g0f", 1_700_000_000_000, "u1", "u2", "Leg day tomorrow?")
    }

    #[test]
    fn envelope_roundtrip() {
        let env = sample();
        let bytes = encode_envelope(&env).unwrap();
        assert_eq!(decode_envelope(&bytes).unwrap(), env);
    }

    #[test]
    fn decode_ignores_extra_fields() {
        let json = br#"{"id":"1-a","timestamp":1,"sender":"u1","receiver":"u2","content":"hi","reactions":["+1"],"v":3}"#;
        let env = decode_envelope(json).unwrap();
        assert_eq!(env.content(), "hi");
        assert_eq!(env.sender(), "u1");
    }

    #[test]
    fn decode_rejects_missing_fields_and_garbage() {
        let missing = br#"{"id":"1-a","timestamp":1,"sender":"u1","content":"hi"}"#;
        assert!(matches!(decode_envelope(missing), Err(CodecError::MalformedEnvelope(_))));
        assert!(matches!(decode_envelope(b"\xff\x00"), Err(CodecError::MalformedEnvelope(_))));
        assert!(matches!(decode_envelope(b"[1,2]"), Err(CodecError::MalformedEnvelope(_))));
    }

    #[test]
    fn plaintext_mode_sends_envelope_json() {
        let codec = MessageCodec::plaintext();
        let env = sample();
        let bytes = codec.seal(&env).unwrap();
        assert_eq!(bytes, encode_envelope(&env).unwrap());
        assert_eq!(codec.open(&bytes, "u2").unwrap(), env);
    }

    #[test]
    fn shared_key_mode_hides_content() {
        let key = generate_symmetric_key().unwrap();
        let codec = MessageCodec::new(PayloadProtection::SharedKey(key));
        let env = sample();

        let bytes = codec.seal(&env).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("Leg day"));
        assert!(!text.contains("recipients"));
        assert_eq!(codec.open(&bytes, "u2").unwrap(), env);
    }

    #[test]
    fn shared_key_mode_uses_fresh_iv_each_time() {
        let key = generate_symmetric_key().unwrap();
        let codec = MessageCodec::new(PayloadProtection::SharedKey(key));
        let env = sample();

        let a: serde_json::Value = serde_json::from_slice(&codec.seal(&env).unwrap()).unwrap();
        let b: serde_json::Value = serde_json::from_slice(&codec.seal(&env).unwrap()).unwrap();
        assert_ne!(a["iv"], b["iv"]);
        assert_ne!(a["ciphertext"], b["ciphertext"]);
    }

    #[test]
    fn shared_key_mode_rejects_other_key() {
        let sender = MessageCodec::new(PayloadProtection::SharedKey(generate_symmetric_key().unwrap()));
        let receiver = MessageCodec::new(PayloadProtection::SharedKey(generate_symmetric_key().unwrap()));
        let bytes = sender.seal(&sample()).unwrap();
        assert!(matches!(
            receiver.open(&bytes, "u2"),
            Err(CodecError::Crypto(CryptoError::Decryption))
        ));
    }

    #[test]
    fn shared_key_mode_rejects_plaintext_envelope() {
        let codec = MessageCodec::new(PayloadProtection::SharedKey(generate_symmetric_key().unwrap()));
        let bytes = encode_envelope(&sample()).unwrap();
        assert!(matches!(codec.open(&bytes, "u2"), Err(CodecError::MalformedEnvelope(_))));
    }

    fn sealed_pair() -> (MessageCodec, MessageCodec, KeyPair) {
        let u1 = generate_asymmetric_key_pair().unwrap();
        let u2 = generate_asymmetric_key_pair().unwrap();
        let u3 = generate_asymmetric_key_pair().unwrap();

        let mut directory = KeyDirectory::new();
        directory.insert("u1", u1.public);
        directory.insert_encoded("u2", &export_key(&u2.public)).unwrap();

        let u1_codec = MessageCodec::new(PayloadProtection::Sealed {
            identity: u1,
            directory: directory.clone(),
        });
        let u2_codec = MessageCodec::new(PayloadProtection::Sealed {
            identity: u2,
            directory,
        });
        (u1_codec, u2_codec, u3)
    }

    #[test]
    fn sealed_mode_opens_for_both_ends() {
        let (u1_codec, u2_codec, _) = sealed_pair();
        let env = sample();

        let bytes = u1_codec.seal(&env).unwrap();
        assert_eq!(u2_codec.open(&bytes, "u2").unwrap(), env);
        // The sender can read its own message back from store replay.
        assert_eq!(u1_codec.open(&bytes, "u1").unwrap(), env);
    }

    #[test]
    fn sealed_mode_is_not_addressed_to_outsiders() {
        let (u1_codec, _, u3) = sealed_pair();
        let bytes = u1_codec.seal(&sample()).unwrap();

        let outsider = MessageCodec::new(PayloadProtection::Sealed {
            identity: u3,
            directory: KeyDirectory::new(),
        });
        assert!(matches!(outsider.open(&bytes, "u3"), Err(CodecError::NotAddressed(_))));
    }

    #[test]
    fn sealed_mode_needs_receiver_key() {
        let (u1_codec, _, _) = sealed_pair();
        let env = Envelope::new("1-a", 1, "u1", "stranger", "hi");
        assert!(matches!(u1_codec.seal(&env), Err(CodecError::MissingRecipientKey(who)) if who == "stranger"));
    }

    #[test]
    fn sealed_mode_rejects_impersonated_recipient_entry() {
        let (u1_codec, _, u3) = sealed_pair();
        let bytes = u1_codec.seal(&sample()).unwrap();

        // u3 claims to be u2 but does not hold u2's private key.
        let impostor = MessageCodec::new(PayloadProtection::Sealed {
            identity: u3,
            directory: KeyDirectory::new(),
        });
        assert!(matches!(
            impostor.open(&bytes, "u2"),
            Err(CodecError::Crypto(CryptoError::Decryption))
        ));
    }
}
