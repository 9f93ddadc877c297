//! Share registry and peer tracking.
//!
//! Tracks the shares we belong to, the invitations we have not yet redeemed,
//! and the peers currently known on each wrapped adapter. A share id lives
//! in `shares` or in `invitations`, never both; redeeming an invitation
//! migrates it.

use crate::adapter::AdapterId;
use std::collections::{BTreeSet, HashMap};
use vouch_crypto::{InvitationSeed, ShareId, Team};
use vouch_transport::PeerId;

/// Identifier of a synchronized document.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
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

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A share: a team we belong to and the documents synced under it.
#[derive(Debug, Clone)]
pub struct Share {
    /// The team behind the share
    pub team: Team,
    /// Documents synced under this share
    pub documents: BTreeSet<DocumentId>,
}

/// An invitation we hold but have not yet redeemed.
#[derive(Debug, Clone)]
pub enum Invitation {
    /// Admits us as a new member
    Member {
        /// The invitation secret
        seed: InvitationSeed,
    },
    /// Admits this device under an existing member
    Device {
        /// The invitation secret
        seed: InvitationSeed,
    },
}

impl Invitation {
    /// The share this invitation admits to.
    #[must_use]
    pub fn share_id(&self) -> &ShareId {
        &self.seed().share_id
    }

    /// The underlying invitation secret.
    #[must_use]
    pub fn seed(&self) -> &InvitationSeed {
        match self {
            Self::Member { seed } | Self::Device { seed } => seed,
        }
    }
}

/// Known shares, pending invitations, and per-adapter peers.
#[derive(Debug, Default)]
pub struct ShareRegistry {
    shares: HashMap<ShareId, Share>,
    invitations: HashMap<ShareId, Invitation>,
    peers: HashMap<AdapterId, BTreeSet<PeerId>>,
}

impl ShareRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a team as a share, or refresh the team of an existing share.
    ///
    /// Admitting a share removes any pending invitation for the same id.
    /// Returns `true` if the share is new.
    pub fn admit_team(&mut self, team: Team) -> bool {
        let share_id = team.id().clone();
        self.invitations.remove(&share_id);
        match self.shares.get_mut(&share_id) {
            Some(share) => {
                share.team = team;
                false
            }
            None => {
                self.shares.insert(
                    share_id,
                    Share {
                        team,
                        documents: BTreeSet::new(),
                    },
                );
                true
            }
        }
    }

    /// Replace the team of an existing share (e.g. after an engine update).
    ///
    /// Returns `false` if the share is unknown.
    pub fn update_team(&mut self, team: Team) -> bool {
        match self.shares.get_mut(team.id()) {
            Some(share) => {
                share.team = team;
                true
            }
            None => false,
        }
    }

    /// Record a pending invitation. Ignored (with a warning) if the share is
    /// already admitted; replaces any previous invitation for the same id.
    pub fn add_invitation(&mut self, invitation: Invitation) {
        let share_id = invitation.share_id().clone();
        if self.shares.contains_key(&share_id) {
            tracing::warn!(share = %share_id, "ignoring invitation for an admitted share");
            return;
        }
        self.invitations.insert(share_id, invitation);
    }

    /// Remove and return the pending invitation for `share_id`.
    pub fn take_invitation(&mut self, share_id: &ShareId) -> Option<Invitation> {
        self.invitations.remove(share_id)
    }

    /// The pending invitation for `share_id`, if any.
    #[must_use]
    pub fn invitation(&self, share_id: &ShareId) -> Option<&Invitation> {
        self.invitations.get(share_id)
    }

    /// The share for `share_id`, if admitted.
    #[must_use]
    pub fn share(&self, share_id: &ShareId) -> Option<&Share> {
        self.shares.get(share_id)
    }

    /// Whether `share_id` is admitted.
    #[must_use]
    pub fn contains_share(&self, share_id: &ShareId) -> bool {
        self.shares.contains_key(share_id)
    }

    /// Iterate admitted shares.
    pub fn shares(&self) -> impl Iterator<Item = (&ShareId, &Share)> {
        self.shares.iter()
    }

    /// All ids sessions should be opened for: admitted shares and pending
    /// invitations alike.
    #[must_use]
    pub fn all_share_ids(&self) -> Vec<ShareId> {
        self.shares
            .keys()
            .chain(self.invitations.keys())
            .cloned()
            .collect()
    }

    /// Add document ids to a share.
    ///
    /// Returns `false` if the share is unknown. Never touches the network.
    pub fn add_documents(&mut self, share_id: &ShareId, ids: Vec<DocumentId>) -> bool {
        match self.shares.get_mut(share_id) {
            Some(share) => {
                share.documents.extend(ids);
                true
            }
            None => false,
        }
    }

    /// Remove document ids from a share.
    ///
    /// Returns `false` if the share is unknown. Never touches the network.
    pub fn remove_documents(&mut self, share_id: &ShareId, ids: &[DocumentId]) -> bool {
        match self.shares.get_mut(share_id) {
            Some(share) => {
                for id in ids {
                    share.documents.remove(id);
                }
                true
            }
            None => false,
        }
    }

    /// Record a peer seen on an adapter. Returns `true` if new.
    pub fn add_peer(&mut self, adapter_id: AdapterId, peer_id: PeerId) -> bool {
        self.peers.entry(adapter_id).or_default().insert(peer_id)
    }

    /// Forget a peer on an adapter.
    pub fn remove_peer(&mut self, adapter_id: AdapterId, peer_id: &PeerId) {
        if let Some(peers) = self.peers.get_mut(&adapter_id) {
            peers.remove(peer_id);
        }
    }

    /// Forget all peers of an adapter.
    pub fn remove_adapter(&mut self, adapter_id: AdapterId) {
        self.peers.remove(&adapter_id);
    }

    /// Peers currently known per adapter.
    pub fn peers(&self) -> impl Iterator<Item = (AdapterId, &BTreeSet<PeerId>)> {
        self.peers.iter().map(|(id, peers)| (*id, peers))
    }
}
