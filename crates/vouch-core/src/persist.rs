//! Persisted share container.
//!
//! The provider stores one CBOR blob under the fixed key path
//! `["AuthProvider", "shares"]`:
//!
//! ```text
//! { shareId: { encryptedTeam:     <sealed team payload>,
//!              encryptedTeamKeys: <keyring sealed under the device wrap key> } }
//! ```
//!
//! Both fields are encrypted forms: the team payload is opaque without its
//! keyring, and the keyring is opaque without the device secret. The device
//! secret itself is never persisted by this layer.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vouch_crypto::{Keyring, SymmetricKey, Team, symmetric};

/// Key path of the persisted share container
pub const SHARES_KEY: [&str; 2] = ["AuthProvider", "shares"];

/// Key path of the recovered user identity (sealed under the device wrap key)
pub const USER_KEY: [&str; 2] = ["AuthProvider", "user"];

/// One share entry in the persisted container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedShare {
    /// Team payload as produced by the team's own save
    #[serde(rename = "encryptedTeam", with = "serde_bytes")]
    pub encrypted_team: Vec<u8>,
    /// Team keyring sealed under the device wrap key
    #[serde(rename = "encryptedTeamKeys", with = "serde_bytes")]
    pub encrypted_team_keys: Vec<u8>,
}

/// The persisted container: share id to sealed entry.
pub type ShareContainer = BTreeMap<String, SealedShare>;

/// Encode a container to its CBOR blob.
///
/// Deterministic for a given container, so decode-then-encode round-trips
/// byte-identically.
///
/// # Errors
///
/// Returns an error if CBOR encoding fails.
pub fn encode_container(container: &ShareContainer) -> Result<Vec<u8>> {
    Ok(serde_cbor::to_vec(container).map_err(vouch_crypto::CryptoError::from)?)
}

/// Decode a CBOR blob to a container.
///
/// # Errors
///
/// Returns an error if the blob is not a valid container.
pub fn decode_container(blob: &[u8]) -> Result<ShareContainer> {
    Ok(serde_cbor::from_slice(blob).map_err(vouch_crypto::CryptoError::from)?)
}

/// Seal one share for persistence under the device wrap key.
///
/// # Errors
///
/// Returns an error if sealing either field fails.
pub fn seal_share(team: &Team, wrap_key: &SymmetricKey) -> Result<SealedShare> {
    Ok(SealedShare {
        encrypted_team: team.save()?,
        encrypted_team_keys: symmetric::seal(&team.keyring().to_bytes(), wrap_key)?,
    })
}

/// Open one persisted share entry with the device wrap key.
///
/// # Errors
///
/// Returns an error if the keyring does not open under `wrap_key` or the
/// team payload does not open under the keyring.
pub fn open_share(sealed: &SealedShare, wrap_key: &SymmetricKey) -> Result<Team> {
    let keyring_bytes = symmetric::open(&sealed.encrypted_team_keys, wrap_key)?;
    let keyring = Keyring::from_bytes(&keyring_bytes)?;
    Ok(Team::load(&sealed.encrypted_team, &keyring)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vouch_crypto::{DeviceIdentity, UserIdentity};

    fn fixtures() -> (Team, DeviceIdentity) {
        let user = UserIdentity::generate("alice").unwrap();
        let device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let team = Team::create(&user, &device).unwrap();
        (team, device)
    }

    #[test]
    fn test_seal_open_share() {
        let (team, device) = fixtures();
        let sealed = seal_share(&team, &device.wrap_key()).unwrap();
        let reopened = open_share(&sealed, &device.wrap_key()).unwrap();
        assert_eq!(reopened.id(), team.id());
        assert!(reopened.is_member("alice"));
    }

    #[test]
    fn test_open_share_requires_device_key() {
        let (team, device) = fixtures();
        let other = DeviceIdentity::generate("other", "mallory").unwrap();

        let sealed = seal_share(&team, &device.wrap_key()).unwrap();
        assert!(open_share(&sealed, &other.wrap_key()).is_err());
    }

    #[test]
    fn test_container_roundtrip_is_byte_identical() {
        let (team, device) = fixtures();
        let mut container = ShareContainer::new();
        container.insert(
            team.id().as_str().to_string(),
            seal_share(&team, &device.wrap_key()).unwrap(),
        );

        let blob = encode_container(&container).unwrap();
        let decoded = decode_container(&blob).unwrap();
        assert_eq!(decoded, container);
        assert_eq!(encode_container(&decoded).unwrap(), blob);
    }

    #[test]
    fn test_empty_container_roundtrip() {
        let blob = encode_container(&ShareContainer::new()).unwrap();
        assert!(decode_container(&blob).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_container(&[0x42, 0x42, 0x42]).is_err());
    }

    #[test]
    fn test_container_fields_are_opaque() {
        let (team, device) = fixtures();
        let sealed = seal_share(&team, &device.wrap_key()).unwrap();

        // Neither field contains the member list in the clear.
        let needle = b"alice";
        let contains = |haystack: &[u8]| {
            haystack
                .windows(needle.len())
                .any(|window| window == needle)
        };
        assert!(!contains(&sealed.encrypted_team));
        assert!(!contains(&sealed.encrypted_team_keys));
    }
}
