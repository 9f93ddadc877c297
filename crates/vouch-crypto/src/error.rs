//! Error types for the Vouch cryptographic engine.

use thiserror::Error;

/// Cryptographic engine errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (wrong key or tampered ciphertext)
    #[error("decryption failed")]
    DecryptionFailed,

    /// Random generator unavailable
    #[error("random generator unavailable: {0}")]
    Rng(String),

    /// Serialization or deserialization of engine state failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A handshake message was malformed or arrived out of protocol order
    #[error("malformed handshake message: {0}")]
    Malformed(String),

    /// The presented invitation is not open on this team
    #[error("unknown invitation: {0}")]
    UnknownInvitation(String),

    /// A membership or invitation proof did not verify
    #[error("proof verification failed")]
    InvalidProof,

    /// The keyring does not match the sealed team payload
    #[error("keyring does not open this team")]
    WrongKeyring,
}

impl From<serde_cbor::Error> for CryptoError {
    fn from(err: serde_cbor::Error) -> Self {
        CryptoError::Serialization(err.to_string())
    }
}

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;
