//! Outward event surface of the provider.
//!
//! Every event is tagged with the share and peer it concerns. Handshake
//! errors are not fatal to other sessions; subscribers should treat
//! `LocalError`/`RemoteError` as diagnostics and `Disconnected` as the
//! actual end of a session.

use vouch_crypto::ShareId;
use vouch_transport::PeerId;

/// Events emitted by the provider as sessions progress.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// We were admitted to a share through an invitation
    Joined {
        /// Share we joined
        share_id: ShareId,
        /// Peer that admitted us
        peer_id: PeerId,
        /// Our user id, set during the join if it was absent
        user_id: String,
    },
    /// A session reached the connected state
    Connected {
        /// Share the session authenticates
        share_id: ShareId,
        /// The authenticated peer
        peer_id: PeerId,
    },
    /// The team behind a share changed
    Updated {
        /// Share whose team changed
        share_id: ShareId,
        /// Peer whose session reported the change
        peer_id: PeerId,
    },
    /// A session ended; reconnecting requires a fresh session
    Disconnected {
        /// Share the session authenticated
        share_id: ShareId,
        /// The peer
        peer_id: PeerId,
    },
    /// Our side of a handshake failed
    LocalError {
        /// Share of the failing session
        share_id: ShareId,
        /// The peer
        peer_id: PeerId,
        /// Failure description
        reason: String,
    },
    /// The remote side of a handshake reported a failure
    RemoteError {
        /// Share of the failing session
        share_id: ShareId,
        /// The peer
        peer_id: PeerId,
        /// Failure description
        reason: String,
    },
}

impl ProviderEvent {
    /// The share this event concerns.
    #[must_use]
    pub fn share_id(&self) -> &ShareId {
        match self {
            Self::Joined { share_id, .. }
            | Self::Connected { share_id, .. }
            | Self::Updated { share_id, .. }
            | Self::Disconnected { share_id, .. }
            | Self::LocalError { share_id, .. }
            | Self::RemoteError { share_id, .. } => share_id,
        }
    }

    /// The peer this event concerns.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        match self {
            Self::Joined { peer_id, .. }
            | Self::Connected { peer_id, .. }
            | Self::Updated { peer_id, .. }
            | Self::Disconnected { peer_id, .. }
            | Self::LocalError { peer_id, .. }
            | Self::RemoteError { peer_id, .. } => peer_id,
        }
    }
}
