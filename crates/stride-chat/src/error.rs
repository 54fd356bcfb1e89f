use thiserror::Error;

use stride_crypto::CryptoError;

/// Failures turning an envelope into wire bytes or back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("No public key known for {0}")]
    MissingRecipientKey(String),

    /// A sealed frame that carries no key for the local user.
    #[error("Payload is not addressed to {0}")]
    NotAddressed(String),
}

/// Failures reported by a pub/sub node implementation.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connection to relay lost")]
    Disconnected,

    #[error("Relay rejected request: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Node is shut down")]
    Closed,
}

/// Lifecycle failures of the transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No suitable peer became reachable; the caller may retry `start`.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Transport has been stopped")]
    Stopped,

    #[error("Transport belongs to {expected}, not {got}")]
    IdentityMismatch { expected: String, got: String },

    #[error(transparent)]
    Node(#[from] NodeError),
}
