//! Team state: membership, root secret, invitations.
//!
//! A team is the unit of co-ownership behind a share. Its root secret (the
//! keyring) is what members prove knowledge of during the handshake and what
//! the persisted team payload is sealed under. Invitations are short-lived
//! secrets minted by a member and consumed on a successful join.
//!
//! The team id is derived from the root secret, so a share id names exactly
//! one team for its entire life.

use crate::error::{CryptoError, Result};
use crate::identity::{DeviceIdentity, UserIdentity};
use crate::symmetric::{self, SymmetricKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const TEAM_ID_CONTEXT: &str = "vouch v1 team id";
const TEAM_SEAL_CONTEXT: &str = "vouch v1 team payload seal";
const INVITE_CLAIM_CONTEXT: &[u8] = b"vouch v1 invitation claim";
const INVITE_WELCOME_CONTEXT: &str = "vouch v1 invitation welcome";

/// Identifier of a share; equal to the id of the team behind it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareId(String);

impl ShareId {
    /// Wrap an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShareId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for ShareId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ShareId({})", self.0)
    }
}

impl From<&str> for ShareId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Key material a device needs to open its copy of the team payload.
///
/// Persisted only in sealed form (wrapped under the device wrap key).
#[derive(Clone)]
pub struct Keyring {
    root: SymmetricKey,
}

impl Keyring {
    /// Raw keyring bytes for sealing into the persisted container.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.root.as_bytes().to_vec()
    }

    /// Rebuild a keyring from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Malformed`] if the length is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let root: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::Malformed("keyring must be 32 bytes".into()))?;
        Ok(Self {
            root: SymmetricKey::from_bytes(root),
        })
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Keyring(..)")
    }
}

/// What an invitation admits: a new member, or a new device of an existing
/// member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationKind {
    /// First device of a user who is not yet on the team
    Member,
    /// Additional device of a user already on the team
    Device,
}

/// The secret handed out-of-band to the invited party.
#[derive(Clone, Serialize, Deserialize)]
pub struct InvitationSeed {
    /// Share the invitation admits to
    pub share_id: ShareId,
    /// Invitation secret
    #[serde(with = "serde_bytes")]
    secret: Vec<u8>,
}

impl InvitationSeed {
    /// Public invitation identifier, derived from the secret.
    #[must_use]
    pub fn invitation_id(&self) -> String {
        invitation_id(&self.secret)
    }

    /// Prove possession of the invitation secret over a handshake nonce.
    #[must_use]
    pub fn claim_proof(&self, nonce: &[u8]) -> [u8; 32] {
        invite_mac(&self.secret, nonce)
    }

    /// Key sealing the welcome package for this invitation exchange.
    #[must_use]
    pub fn welcome_key(&self, invitee_nonce: &[u8], member_nonce: &[u8]) -> SymmetricKey {
        welcome_key(&self.secret, invitee_nonce, member_nonce)
    }
}

impl std::fmt::Debug for InvitationSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvitationSeed")
            .field("share_id", &self.share_id)
            .field("invitation_id", &self.invitation_id())
            .finish_non_exhaustive()
    }
}

/// An open invitation as recorded on the team.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InvitationRecord {
    #[serde(with = "serde_bytes")]
    secret: Vec<u8>,
    kind: InvitationKind,
    user_id: String,
}

/// The team document: members, their devices, open invitations, root secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct Team {
    id: ShareId,
    #[serde(with = "serde_bytes")]
    root: Vec<u8>,
    members: BTreeSet<String>,
    /// device id -> owning user id
    devices: BTreeMap<String, String>,
    invitations: BTreeMap<String, InvitationRecord>,
}

impl Team {
    /// Found a new team with a random root secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Rng`] if secret generation fails.
    pub fn create(founder: &UserIdentity, device: &DeviceIdentity) -> Result<Self> {
        let root = SymmetricKey::generate()?;
        let id = derive_team_id(root.as_bytes());

        let mut members = BTreeSet::new();
        members.insert(founder.user_id.clone());
        let mut devices = BTreeMap::new();
        devices.insert(device.device_id.clone(), founder.user_id.clone());

        Ok(Self {
            id,
            root: root.as_bytes().to_vec(),
            members,
            devices,
            invitations: BTreeMap::new(),
        })
    }

    /// Team id (equals the share id).
    #[must_use]
    pub fn id(&self) -> &ShareId {
        &self.id
    }

    /// The keyring needed to open this team's sealed payload.
    #[must_use]
    pub fn keyring(&self) -> Keyring {
        Keyring {
            root: self.root_key(),
        }
    }

    /// Root secret as a symmetric key.
    pub(crate) fn root_key(&self) -> SymmetricKey {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&self.root);
        SymmetricKey::from_bytes(bytes)
    }

    /// Serialize and seal the team document under a keyring-derived key.
    ///
    /// The output is opaque without the keyring.
    ///
    /// # Errors
    ///
    /// Returns a serialization or encryption error.
    pub fn save(&self) -> Result<Vec<u8>> {
        let doc = serde_cbor::to_vec(self)?;
        symmetric::seal(&doc, &self.root_key().derive(TEAM_SEAL_CONTEXT))
    }

    /// Open a sealed team payload with its keyring.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] if the keyring is wrong and
    /// [`CryptoError::WrongKeyring`] if the payload opens but belongs to a
    /// different root secret.
    pub fn load(sealed: &[u8], keyring: &Keyring) -> Result<Self> {
        let doc = symmetric::open(sealed, &keyring.root.derive(TEAM_SEAL_CONTEXT))?;
        let team: Team = serde_cbor::from_slice(&doc)?;
        if team.root != keyring.root.as_bytes() {
            return Err(CryptoError::WrongKeyring);
        }
        Ok(team)
    }

    /// Whether `user_id` is on the team.
    #[must_use]
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }

    /// Member user ids.
    #[must_use]
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    /// Number of registered devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Add a user and one of their devices to the team.
    pub fn admit(&mut self, user_id: impl Into<String>, device_id: impl Into<String>) {
        let user_id = user_id.into();
        self.members.insert(user_id.clone());
        self.devices.insert(device_id.into(), user_id);
    }

    /// Mint an invitation for a new member.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Rng`] if secret generation fails.
    pub fn invite_member(&mut self, user_id: impl Into<String>) -> Result<InvitationSeed> {
        self.mint(InvitationKind::Member, user_id.into())
    }

    /// Mint an invitation for an additional device of an existing member.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Malformed`] if `user_id` is not a member, or
    /// [`CryptoError::Rng`] if secret generation fails.
    pub fn invite_device(&mut self, user_id: impl Into<String>) -> Result<InvitationSeed> {
        let user_id = user_id.into();
        if !self.members.contains(&user_id) {
            return Err(CryptoError::Malformed(format!(
                "cannot mint device invitation for non-member {user_id}"
            )));
        }
        self.mint(InvitationKind::Device, user_id)
    }

    fn mint(&mut self, kind: InvitationKind, user_id: String) -> Result<InvitationSeed> {
        let secret = SymmetricKey::generate()?.as_bytes().to_vec();
        let id = invitation_id(&secret);
        self.invitations.insert(
            id,
            InvitationRecord {
                secret: secret.clone(),
                kind,
                user_id,
            },
        );
        Ok(InvitationSeed {
            share_id: self.id.clone(),
            secret,
        })
    }

    /// Verify an invitation claim proof against an open invitation.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnknownInvitation`] if no such invitation is
    /// open, or [`CryptoError::InvalidProof`] if the proof does not verify.
    pub fn verify_invitation(&self, invitation_id: &str, nonce: &[u8], proof: &[u8]) -> Result<()> {
        let record = self
            .invitations
            .get(invitation_id)
            .ok_or_else(|| CryptoError::UnknownInvitation(invitation_id.to_string()))?;
        let expected = invite_mac(&record.secret, nonce);
        if blake3::Hash::from_bytes(expected)
            == blake3::Hash::from_bytes(
                proof
                    .try_into()
                    .map_err(|_| CryptoError::InvalidProof)?,
            )
        {
            Ok(())
        } else {
            Err(CryptoError::InvalidProof)
        }
    }

    /// Welcome-package key for an open invitation exchange.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnknownInvitation`] if no such invitation is open.
    pub fn invitation_welcome_key(
        &self,
        invitation_id: &str,
        invitee_nonce: &[u8],
        member_nonce: &[u8],
    ) -> Result<SymmetricKey> {
        let record = self
            .invitations
            .get(invitation_id)
            .ok_or_else(|| CryptoError::UnknownInvitation(invitation_id.to_string()))?;
        Ok(welcome_key(&record.secret, invitee_nonce, member_nonce))
    }

    /// Consume an open invitation, admitting the invited user and device.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnknownInvitation`] if no such invitation is open.
    pub fn consume_invitation(
        &mut self,
        invitation_id: &str,
        device_id: impl Into<String>,
    ) -> Result<(InvitationKind, String)> {
        let record = self
            .invitations
            .remove(invitation_id)
            .ok_or_else(|| CryptoError::UnknownInvitation(invitation_id.to_string()))?;
        self.admit(record.user_id.clone(), device_id);
        Ok((record.kind, record.user_id))
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("id", &self.id)
            .field("members", &self.members)
            .field("devices", &self.devices.len())
            .field("invitations", &self.invitations.len())
            .finish_non_exhaustive()
    }
}

fn derive_team_id(root: &[u8; 32]) -> ShareId {
    let id = blake3::derive_key(TEAM_ID_CONTEXT, root);
    ShareId::new(hex::encode(&id[..16]))
}

fn invitation_id(secret: &[u8]) -> String {
    hex::encode(&blake3::hash(secret).as_bytes()[..16])
}

fn invite_mac(secret: &[u8], nonce: &[u8]) -> [u8; 32] {
    let key = blake3::hash(secret);
    let mut hasher = blake3::Hasher::new_keyed(key.as_bytes());
    hasher.update(INVITE_CLAIM_CONTEXT);
    hasher.update(nonce);
    *hasher.finalize().as_bytes()
}

fn welcome_key(secret: &[u8], invitee_nonce: &[u8], member_nonce: &[u8]) -> SymmetricKey {
    let key = blake3::derive_key(INVITE_WELCOME_CONTEXT, secret);
    let mut hasher = blake3::Hasher::new_keyed(&key);
    hasher.update(invitee_nonce);
    hasher.update(member_nonce);
    SymmetricKey::from_bytes(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn founder() -> (UserIdentity, DeviceIdentity) {
        let user = UserIdentity::generate("alice").unwrap();
        let device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        (user, device)
    }

    #[test]
    fn test_create_registers_founder() {
        let (user, device) = founder();
        let team = Team::create(&user, &device).unwrap();

        assert!(team.is_member("alice"));
        assert_eq!(team.device_count(), 1);
        assert!(!team.id().as_str().is_empty());
    }

    #[test]
    fn test_team_id_stable_under_save_load() {
        let (user, device) = founder();
        let team = Team::create(&user, &device).unwrap();

        let sealed = team.save().unwrap();
        let reloaded = Team::load(&sealed, &team.keyring()).unwrap();
        assert_eq!(team.id(), reloaded.id());
        assert!(reloaded.is_member("alice"));
    }

    #[test]
    fn test_load_rejects_wrong_keyring() {
        let (user, device) = founder();
        let team = Team::create(&user, &device).unwrap();
        let other = Team::create(&user, &device).unwrap();

        let sealed = team.save().unwrap();
        assert!(Team::load(&sealed, &other.keyring()).is_err());
    }

    #[test]
    fn test_keyring_roundtrip() {
        let (user, device) = founder();
        let team = Team::create(&user, &device).unwrap();

        let bytes = team.keyring().to_bytes();
        let keyring = Keyring::from_bytes(&bytes).unwrap();
        let sealed = team.save().unwrap();
        assert!(Team::load(&sealed, &keyring).is_ok());
    }

    #[test]
    fn test_keyring_rejects_bad_length() {
        assert!(Keyring::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_invitation_mint_verify_consume() {
        let (user, device) = founder();
        let mut team = Team::create(&user, &device).unwrap();

        let seed = team.invite_member("bob").unwrap();
        let id = seed.invitation_id();
        let nonce = [7u8; 32];
        let proof = seed.claim_proof(&nonce);

        team.verify_invitation(&id, &nonce, &proof).unwrap();
        let (kind, user_id) = team.consume_invitation(&id, "bob-phone").unwrap();
        assert_eq!(kind, InvitationKind::Member);
        assert_eq!(user_id, "bob");
        assert!(team.is_member("bob"));

        // Consumed invitations are gone.
        assert!(team.verify_invitation(&id, &nonce, &proof).is_err());
    }

    #[test]
    fn test_invitation_rejects_bad_proof() {
        let (user, device) = founder();
        let mut team = Team::create(&user, &device).unwrap();

        let seed = team.invite_member("bob").unwrap();
        let nonce = [7u8; 32];
        let mut proof = seed.claim_proof(&nonce);
        proof[0] ^= 0xFF;

        assert!(matches!(
            team.verify_invitation(&seed.invitation_id(), &nonce, &proof),
            Err(CryptoError::InvalidProof)
        ));
    }

    #[test]
    fn test_unknown_invitation() {
        let (user, device) = founder();
        let team = Team::create(&user, &device).unwrap();
        assert!(matches!(
            team.verify_invitation("deadbeef", &[0u8; 32], &[0u8; 32]),
            Err(CryptoError::UnknownInvitation(_))
        ));
    }

    #[test]
    fn test_device_invitation_requires_membership() {
        let (user, device) = founder();
        let mut team = Team::create(&user, &device).unwrap();

        assert!(team.invite_device("mallory").is_err());
        assert!(team.invite_device("alice").is_ok());
    }

    #[test]
    fn test_welcome_key_agreement() {
        let (user, device) = founder();
        let mut team = Team::create(&user, &device).unwrap();
        let seed = team.invite_member("bob").unwrap();

        let invitee_nonce = [1u8; 32];
        let member_nonce = [2u8; 32];
        let from_seed = seed.welcome_key(&invitee_nonce, &member_nonce);
        let from_team = team
            .invitation_welcome_key(&seed.invitation_id(), &invitee_nonce, &member_nonce)
            .unwrap();
        assert_eq!(from_seed.as_bytes(), from_team.as_bytes());
    }
}
