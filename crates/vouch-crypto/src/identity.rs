//! Device and user identities.
//!
//! A device carries an Ed25519 keypair and belongs to exactly one user. The
//! user identity may be absent early in a device's life (a fresh device
//! joining a share through an invitation receives or generates it during the
//! handshake).
//!
//! The device secret also anchors at-rest encryption: the wrap key derived
//! from it seals the team keyring inside the persisted share container. The
//! device secret itself is never persisted by this layer.

use crate::error::{CryptoError, Result};
use crate::symmetric::SymmetricKey;
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Key-derivation context for the device wrap key
const WRAP_KEY_CONTEXT: &str = "vouch v1 device share-container wrap key";

/// An Ed25519 keypair.
///
/// Serializes as the 32-byte secret; the public half is re-derived on load.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the system RNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Rng`] if the system RNG is unavailable.
    pub fn generate() -> Result<Self> {
        let mut secret = [0u8; 32];
        getrandom::getrandom(&mut secret).map_err(|e| CryptoError::Rng(e.to_string()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&secret),
        })
    }

    /// Rebuild a keypair from its 32-byte secret.
    #[must_use]
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    /// Public half of the keypair.
    #[must_use]
    pub fn public(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Public key bytes.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub(crate) fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(&self.public_bytes()[..8]))
            .finish_non_exhaustive()
    }
}

/// A device: the unit that holds keys and runs handshakes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Stable device identifier
    pub device_id: String,
    /// Identifier of the owning user
    pub user_id: String,
    /// Device keypair
    pub keys: KeyPair,
}

impl DeviceIdentity {
    /// Create a device identity with a fresh keypair.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Rng`] if key generation fails.
    pub fn generate(device_id: impl Into<String>, user_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            keys: KeyPair::generate()?,
        })
    }

    /// Wrap key for the persisted share container, derived from the device
    /// secret. Deterministic per device, never stored.
    #[must_use]
    pub fn wrap_key(&self) -> SymmetricKey {
        SymmetricKey::from_bytes(blake3::derive_key(
            WRAP_KEY_CONTEXT,
            &self.keys.secret_bytes(),
        ))
    }
}

/// A user: the membership unit inside a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable user identifier
    pub user_id: String,
    /// User keypair
    pub keys: KeyPair,
}

impl UserIdentity {
    /// Create a user identity with a fresh keypair.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Rng`] if key generation fails.
    pub fn generate(user_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            user_id: user_id.into(),
            keys: KeyPair::generate()?,
        })
    }
}
