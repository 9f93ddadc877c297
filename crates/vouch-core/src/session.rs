//! Provider-side session wrapper.
//!
//! A [`Session`] owns one handshake connection for one (share, adapter,
//! peer) triple and tracks its lifecycle:
//!
//! ```text
//! Created ──start──▶ Handshaking ──(joined)──▶ Member
//! Handshaking ──(connected)──▶ Connected   (session key available)
//! any ──(disconnected | fatal error)──▶ Closed
//! ```
//!
//! `Closed` is terminal; reconnecting requires a new session. The session
//! key is available exactly while the state is `Connected`.

use crate::adapter::AdapterId;
use vouch_crypto::{Connection, ConnectionContext, ConnectionEvent, CryptoError, SessionKey, ShareId};
use vouch_transport::PeerId;

/// Key of a session: one per (share, adapter, peer).
///
/// The adapter id is part of the key because peer ids are scoped to their
/// adapter; the same peer string on two adapters is two peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId {
    /// Share the session authenticates for
    pub share_id: ShareId,
    /// Adapter the peer was seen on
    pub adapter_id: AdapterId,
    /// The remote peer
    pub peer_id: PeerId,
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, handshake not started
    Created,
    /// Handshake in progress
    Handshaking,
    /// Admitted to the team via invitation; key agreement still pending
    Member,
    /// Authenticated; session key available
    Connected,
    /// Terminal; a new session is required to reconnect
    Closed,
}

impl SessionState {
    /// Whether a transition to `to` is allowed from this state.
    #[must_use]
    pub fn can_transition(self, to: SessionState) -> bool {
        match (self, to) {
            (SessionState::Created, SessionState::Handshaking)
            | (SessionState::Handshaking, SessionState::Member | SessionState::Connected)
            | (SessionState::Member, SessionState::Connected) => true,
            // Any state may close.
            (_, SessionState::Closed) => true,
            _ => false,
        }
    }
}

/// One handshake session for one (share, adapter, peer) triple.
pub struct Session {
    id: SessionId,
    state: SessionState,
    connection: Connection,
    session_key: Option<SessionKey>,
}

impl Session {
    /// Create a session over a fresh connection for `ctx`.
    ///
    /// # Errors
    ///
    /// Returns a [`CryptoError`] if the connection cannot be constructed.
    pub fn new(id: SessionId, ctx: ConnectionContext) -> Result<Self, CryptoError> {
        Ok(Self {
            id,
            state: SessionState::Created,
            connection: Connection::new(ctx)?,
            session_key: None,
        })
    }

    /// The session's key triple.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session key; `Some` exactly while [`SessionState::Connected`].
    #[must_use]
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Start the handshake, returning the connection's first effects.
    pub fn start(&mut self) -> Vec<ConnectionEvent> {
        self.transition(SessionState::Handshaking);
        let events = self.connection.start();
        self.track(events)
    }

    /// Deliver one serialized connection message from the remote side.
    pub fn deliver(&mut self, bytes: &[u8]) -> Vec<ConnectionEvent> {
        let events = self.connection.deliver(bytes);
        self.track(events)
    }

    fn track(&mut self, events: Vec<ConnectionEvent>) -> Vec<ConnectionEvent> {
        for event in &events {
            match event {
                ConnectionEvent::Joined { .. } => self.transition(SessionState::Member),
                ConnectionEvent::Connected { key } => {
                    self.session_key = Some(key.clone());
                    self.transition(SessionState::Connected);
                }
                ConnectionEvent::Disconnected => {
                    self.session_key = None;
                    self.transition(SessionState::Closed);
                }
                _ => {}
            }
        }
        events
    }

    fn transition(&mut self, to: SessionState) {
        if self.state.can_transition(to) {
            tracing::debug!(
                share = %self.id.share_id,
                peer = %self.id.peer_id,
                from = ?self.state,
                to = ?to,
                "session state transition"
            );
            self.state = to;
        } else {
            tracing::warn!(
                share = %self.id.share_id,
                peer = %self.id.peer_id,
                from = ?self.state,
                to = ?to,
                "ignoring invalid session transition"
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
