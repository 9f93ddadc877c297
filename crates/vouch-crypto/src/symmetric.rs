//! XChaCha20-Poly1305 sealing with embedded nonces.
//!
//! `seal` prepends a random 24-byte nonce so the output is self-contained;
//! `open` is its inverse. Used for the persisted team keyring, the sealed
//! team payload, handshake welcome packages, and all post-handshake traffic.

use crate::error::{CryptoError, Result};
use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{Aead, KeyInit},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce length for XChaCha20-Poly1305
pub const NONCE_LEN: usize = 24;

/// A 32-byte symmetric secret.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Rng`] if the system RNG is unavailable.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::Rng(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a sub-key for a named purpose.
    #[must_use]
    pub fn derive(&self, context: &str) -> SymmetricKey {
        SymmetricKey(blake3::derive_key(context, &self.0))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Session key agreed by a completed handshake.
///
/// Ordering compares raw bytes; the provider uses it as a deterministic
/// tie-break when several shares can reach the same peer.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// View as a symmetric key for sealing.
    #[must_use]
    pub fn as_symmetric(&self) -> SymmetricKey {
        SymmetricKey(self.0)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Encrypt `plaintext` under `key`, embedding a fresh random nonce.
///
/// # Errors
///
/// Returns [`CryptoError::Rng`] if nonce generation fails or
/// [`CryptoError::EncryptionFailed`] on cipher failure.
pub fn seal(plaintext: &[u8], key: &SymmetricKey) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::Rng(e.to_string()))?;

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt((&nonce).into(), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt output of [`seal`].
///
/// # Errors
///
/// Returns [`CryptoError::DecryptionFailed`] if the input is too short, the
/// key is wrong, or the ciphertext was tampered with.
pub fn open(sealed: &[u8], key: &SymmetricKey) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| CryptoError::DecryptionFailed)?;

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt((&nonce).into(), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
