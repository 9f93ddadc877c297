//! The authenticated-sync provider.
//!
//! The provider owns the share registry, the pending-message buffer, and one
//! handshake session per (share, adapter, peer). It wraps base adapters into
//! [`AuthenticatedAdapter`]s, routes classified inbound frames to sessions
//! or (decrypted) to the repository, seals outbound repository messages
//! under the right session key, and persists team state across restarts.
//!
//! # Concurrency
//!
//! All mutable state lives behind one `tokio::sync::Mutex`, so every adapter
//! event, handshake effect, and store completion runs serialized, exactly as
//! a single-threaded cooperative executor would. The only suspension points
//! are storage I/O and base-adapter sends, both of which are safe to await
//! while holding the lock (sends into the in-process adapters never block).
//!
//! # Session opening
//!
//! Two triggers open sessions, and both compute the full cross-product of
//! known peers × (shares ∪ invitations): a peer appearing on a base adapter,
//! and a share or invitation being admitted. Sessions are opened
//! optimistically toward every peer; a peer that is not on a team fails that
//! one session with a benign error and nothing else.

use crate::adapter::{AdapterId, AuthenticatedAdapter};
use crate::buffer::PendingMessages;
use crate::error::{AuthError, Result};
use crate::events::ProviderEvent;
use crate::persist::{self, ShareContainer};
use crate::registry::{DocumentId, Invitation, ShareRegistry};
use crate::session::{Session, SessionId, SessionState};
use crate::store::Storage;
use crate::wire::{self, WireMessage};
use dashmap::DashMap;
use serde_cbor::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use vouch_crypto::{
    ConnectionContext, ConnectionEvent, DeviceIdentity, SessionKey, ShareId, Team, UserIdentity,
    symmetric,
};
use vouch_transport::{AdapterEvent, NetworkAdapter, PeerId};

/// Capacity of the outward event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Provider construction parameters.
pub struct AuthProviderConfig {
    /// This device's identity; anchors the at-rest encryption
    pub device: DeviceIdentity,
    /// User identity; absent on a fresh device joining via invitation
    pub user: Option<UserIdentity>,
    /// Persistence backend
    pub storage: Arc<dyn Storage>,
}

/// The authenticated-sync provider.
///
/// Cheap to clone; clones share one provider.
#[derive(Clone)]
pub struct AuthProvider {
    inner: Arc<ProviderInner>,
}

pub(crate) struct ProviderInner {
    device: DeviceIdentity,
    storage: Arc<dyn Storage>,
    adapters: DashMap<AdapterId, AdapterHandle>,
    state: Mutex<ProviderState>,
    next_adapter_id: AtomicU64,
    events: broadcast::Sender<ProviderEvent>,
    loaded: watch::Sender<bool>,
}

struct AdapterHandle {
    base: Arc<dyn NetworkAdapter>,
    local: PeerId,
    upward: mpsc::UnboundedSender<AdapterEvent>,
}

struct ProviderState {
    user: Option<UserIdentity>,
    registry: ShareRegistry,
    sessions: HashMap<SessionId, Session>,
    pending: PendingMessages,
    /// Peers already announced upward, per wrapper; cleared on disconnect so
    /// a fresh connect re-announces.
    announced: HashMap<AdapterId, BTreeSet<PeerId>>,
}

impl AuthProvider {
    /// Create a provider and schedule the asynchronous load of persisted
    /// state. Returns immediately; no handshake happens until [`Self::wrap`].
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(config: AuthProviderConfig) -> Self {
        let (loaded, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let inner = Arc::new(ProviderInner {
            device: config.device,
            storage: config.storage,
            adapters: DashMap::new(),
            state: Mutex::new(ProviderState {
                user: config.user,
                registry: ShareRegistry::new(),
                sessions: HashMap::new(),
                pending: PendingMessages::new(),
                announced: HashMap::new(),
            }),
            next_adapter_id: AtomicU64::new(0),
            events,
            loaded,
        });

        let load = Arc::clone(&inner);
        tokio::spawn(async move {
            load.load_state().await;
        });

        Self { inner }
    }

    /// Wait until persisted state has been loaded (or found absent).
    pub async fn ready(&self) {
        let mut loaded = self.inner.loaded.subscribe();
        while !*loaded.borrow() {
            if loaded.changed().await.is_err() {
                return;
            }
        }
    }

    /// Subscribe to the outward event surface.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }

    /// Wrap a base adapter into an authenticated one.
    ///
    /// Each call produces a distinct wrapper; the wrapper presents the same
    /// trait as the base and can be handed to the repository as-is.
    #[must_use]
    pub fn wrap(&self, base: Arc<dyn NetworkAdapter>) -> Arc<AuthenticatedAdapter> {
        let id = AdapterId::new(self.inner.next_adapter_id.fetch_add(1, Ordering::Relaxed));
        let local = base.local_peer_id();
        let (upward, upward_rx) = mpsc::unbounded_channel();

        self.inner.adapters.insert(
            id,
            AdapterHandle {
                base: Arc::clone(&base),
                local: local.clone(),
                upward,
            },
        );
        tracing::info!(adapter = %id, local = %local, "wrapped base adapter");

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = base.next_event().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.handle_adapter_event(id, event).await;
            }
        });

        Arc::new(AuthenticatedAdapter::new(
            id,
            local,
            Arc::downgrade(&self.inner),
            upward_rx,
        ))
    }

    /// Admit a team as a share and open sessions toward all known peers.
    ///
    /// Admitting the same team twice refreshes it without creating duplicate
    /// sessions. Triggers a state save.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error if the save fails; the
    /// in-memory admission has happened regardless.
    pub async fn add_team(&self, team: Team) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        tracing::info!(share = %team.id(), "admitting team");
        state.registry.admit_team(team);
        self.inner.open_all_sessions(&mut state).await;
        self.inner.save_state_locked(&state).await
    }

    /// Record a pending invitation and open sessions toward all known peers
    /// so a joining handshake can begin. Does not save: there is no team
    /// material yet.
    pub async fn add_invitation(&self, invitation: Invitation) {
        let mut state = self.inner.state.lock().await;
        tracing::info!(share = %invitation.share_id(), "recording invitation");
        state.registry.add_invitation(invitation);
        self.inner.open_all_sessions(&mut state).await;
    }

    /// Add document ids to a share. Pure mutation: no network traffic.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownShare`] if the share is not admitted.
    pub async fn add_documents(&self, share_id: &ShareId, ids: Vec<DocumentId>) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.registry.add_documents(share_id, ids) {
            Ok(())
        } else {
            Err(AuthError::UnknownShare(share_id.clone()))
        }
    }

    /// Remove document ids from a share. Pure mutation: no network traffic.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownShare`] if the share is not admitted.
    pub async fn remove_documents(&self, share_id: &ShareId, ids: &[DocumentId]) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.registry.remove_documents(share_id, ids) {
            Ok(())
        } else {
            Err(AuthError::UnknownShare(share_id.clone()))
        }
    }

    /// Ids of all admitted shares.
    pub async fn share_ids(&self) -> Vec<ShareId> {
        let state = self.inner.state.lock().await;
        state.registry.shares().map(|(id, _)| id.clone()).collect()
    }

    /// Whether a share is admitted.
    pub async fn has_share(&self, share_id: &ShareId) -> bool {
        self.inner.state.lock().await.registry.contains_share(share_id)
    }

    /// Ids of all pending invitations.
    pub async fn pending_invitations(&self) -> Vec<ShareId> {
        let state = self.inner.state.lock().await;
        let mut ids: Vec<_> = state
            .registry
            .all_share_ids()
            .into_iter()
            .filter(|id| !state.registry.contains_share(id))
            .collect();
        ids.sort();
        ids
    }

    /// Current user id, if an identity is present.
    pub async fn user_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .await
            .user
            .as_ref()
            .map(|u| u.user_id.clone())
    }

    /// Document ids of a share.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownShare`] if the share is not admitted.
    pub async fn share_documents(&self, share_id: &ShareId) -> Result<Vec<DocumentId>> {
        let state = self.inner.state.lock().await;
        state
            .registry
            .share(share_id)
            .map(|share| share.documents.iter().cloned().collect())
            .ok_or_else(|| AuthError::UnknownShare(share_id.clone()))
    }
}

impl ProviderInner {
    /// Load persisted state: the sealed user identity (if any) and the share
    /// container. Failures are logged; an unreadable blob leaves the
    /// provider empty but functional.
    async fn load_state(self: Arc<Self>) {
        let wrap_key = self.device.wrap_key();

        match self.storage.load(&persist::USER_KEY).await {
            Ok(Some(sealed)) => {
                match symmetric::open(&sealed, &wrap_key)
                    .map_err(AuthError::from)
                    .and_then(|doc| {
                        serde_cbor::from_slice::<UserIdentity>(&doc)
                            .map_err(|e| vouch_crypto::CryptoError::from(e).into())
                    }) {
                    Ok(user) => {
                        let mut state = self.state.lock().await;
                        if state.user.is_none() {
                            tracing::info!(user = %user.user_id, "recovered user identity");
                            state.user = Some(user);
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to open persisted user identity");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "failed to load persisted user identity"),
        }

        match self.storage.load(&persist::SHARES_KEY).await {
            Ok(Some(blob)) => match persist::decode_container(&blob) {
                Ok(container) => {
                    let mut state = self.state.lock().await;
                    for (share_id, sealed) in &container {
                        match persist::open_share(sealed, &wrap_key) {
                            Ok(team) => {
                                tracing::info!(share = %share_id, "restored share");
                                state.registry.admit_team(team);
                            }
                            Err(e) => {
                                tracing::error!(share = %share_id, error = %e, "failed to open persisted share");
                            }
                        }
                    }
                    self.open_all_sessions(&mut state).await;
                }
                Err(e) => tracing::error!(error = %e, "failed to decode persisted share container"),
            },
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "failed to load persisted shares"),
        }

        self.loaded.send_replace(true);
    }

    /// One adapter event, fully processed under the state lock.
    pub(crate) async fn handle_adapter_event(&self, adapter_id: AdapterId, event: AdapterEvent) {
        match event {
            AdapterEvent::Ready => self.emit_upward(adapter_id, AdapterEvent::Ready),
            AdapterEvent::Error { peer_id, reason } => {
                self.emit_upward(adapter_id, AdapterEvent::Error { peer_id, reason });
            }
            AdapterEvent::PeerCandidate { peer_id } => {
                let mut state = self.state.lock().await;
                tracing::debug!(adapter = %adapter_id, peer = %peer_id, "peer appeared on base adapter");
                state.registry.add_peer(adapter_id, peer_id);
                self.open_all_sessions(&mut state).await;
                // Not forwarded: the peer is announced upward only once a
                // session for it authenticates.
            }
            AdapterEvent::PeerDisconnected { peer_id } => {
                let mut state = self.state.lock().await;
                state.registry.remove_peer(adapter_id, &peer_id);
                state.pending.remove_peer(adapter_id, &peer_id);
                if let Some(announced) = state.announced.get_mut(&adapter_id) {
                    announced.remove(&peer_id);
                }
                self.close_sessions(&mut state, |sid| {
                    sid.adapter_id == adapter_id && sid.peer_id == peer_id
                });
                drop(state);
                self.emit_upward(adapter_id, AdapterEvent::PeerDisconnected { peer_id });
            }
            AdapterEvent::Message { data } => self.handle_inbound(adapter_id, data).await,
            AdapterEvent::Closed => {
                let mut state = self.state.lock().await;
                tracing::info!(adapter = %adapter_id, "base adapter closed");
                state.registry.remove_adapter(adapter_id);
                state.pending.remove_adapter(adapter_id);
                state.announced.remove(&adapter_id);
                self.close_sessions(&mut state, |sid| sid.adapter_id == adapter_id);
                drop(state);
                self.emit_upward(adapter_id, AdapterEvent::Closed);
                self.adapters.remove(&adapter_id);
            }
        }
    }

    /// Classify one inbound frame and route it.
    ///
    /// Invalid frames are logged and dropped; all other inbound failures are
    /// surfaced as `Error` events on the authenticated adapter and leave the
    /// session as-is.
    async fn handle_inbound(&self, adapter_id: AdapterId, data: Vec<u8>) {
        let message = match WireMessage::decode(&data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(adapter = %adapter_id, error = %e, "dropping invalid frame");
                return;
            }
        };

        match message {
            WireMessage::Auth {
                sender_id,
                share_id,
                message,
                ..
            } => {
                let sid = SessionId {
                    share_id,
                    adapter_id,
                    peer_id: sender_id,
                };
                let mut state = self.state.lock().await;
                if state.sessions.contains_key(&sid) {
                    let events = state
                        .sessions
                        .get_mut(&sid)
                        .map(|session| session.deliver(&message))
                        .unwrap_or_default();
                    self.process_connection_events(&mut state, &sid, events).await;
                } else {
                    state.pending.push(sid, message);
                }
            }
            WireMessage::Encrypted {
                sender_id,
                share_id,
                ciphertext,
                ..
            } => {
                let sid = SessionId {
                    share_id,
                    adapter_id,
                    peer_id: sender_id.clone(),
                };
                let state = self.state.lock().await;
                let key = state
                    .sessions
                    .get(&sid)
                    .filter(|session| session.state() == SessionState::Connected)
                    .and_then(|session| session.session_key().cloned());
                match key {
                    Some(key) => match symmetric::open(&ciphertext, &key.as_symmetric()) {
                        Ok(plaintext) => {
                            self.emit_upward(adapter_id, AdapterEvent::Message { data: plaintext });
                        }
                        Err(e) => {
                            tracing::warn!(peer = %sender_id, error = %e, "failed to decrypt message");
                            self.emit_upward(
                                adapter_id,
                                AdapterEvent::Error {
                                    peer_id: Some(sender_id),
                                    reason: format!("failed to decrypt message: {e}"),
                                },
                            );
                        }
                    },
                    None => {
                        tracing::warn!(peer = %sender_id, share = %sid.share_id, "encrypted frame without a connected session");
                        self.emit_upward(
                            adapter_id,
                            AdapterEvent::Error {
                                peer_id: Some(sender_id),
                                reason: "encrypted frame without a connected session".to_string(),
                            },
                        );
                    }
                }
            }
            // Repository messages the base adapter passes through unchanged.
            WireMessage::PassThrough { .. } => {
                self.emit_upward(adapter_id, AdapterEvent::Message { data });
            }
        }
    }

    /// Seal and transmit one plaintext repository message.
    ///
    /// Routing failures surface as `Error` events on the authenticated
    /// adapter; the repository's send path never sees them.
    pub(crate) async fn send_from_repo(&self, adapter_id: AdapterId, frame: Vec<u8>) {
        let value: Value = match serde_cbor::from_slice(&frame) {
            Ok(value) => value,
            Err(e) => {
                let error = AuthError::InvalidOutbound(format!("undecodable frame: {e}"));
                self.emit_upward(
                    adapter_id,
                    AdapterEvent::Error {
                        peer_id: None,
                        reason: error.to_string(),
                    },
                );
                return;
            }
        };
        let Some(target) = wire::plaintext_target(&value) else {
            let error = AuthError::InvalidOutbound("missing targetId".to_string());
            self.emit_upward(
                adapter_id,
                AdapterEvent::Error {
                    peer_id: None,
                    reason: error.to_string(),
                },
            );
            return;
        };
        let document = wire::plaintext_document(&value);

        let selected = {
            let state = self.state.lock().await;
            self.select_share(&state, adapter_id, &target, document.as_ref())
        };
        let Some((share_id, key)) = selected else {
            let error = AuthError::NoShareForPeer(target.clone());
            tracing::warn!(peer = %target, "no share for peer");
            self.emit_upward(
                adapter_id,
                AdapterEvent::Error {
                    peer_id: Some(target.clone()),
                    reason: error.to_string(),
                },
            );
            return;
        };

        let ciphertext = match symmetric::seal(&frame, &key.as_symmetric()) {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                self.emit_upward(
                    adapter_id,
                    AdapterEvent::Error {
                        peer_id: Some(target.clone()),
                        reason: format!("failed to seal message: {e}"),
                    },
                );
                return;
            }
        };
        let Some(local) = self.local_peer(adapter_id) else {
            return;
        };
        let message = WireMessage::Encrypted {
            sender_id: local,
            target_id: Some(target.clone()),
            share_id,
            ciphertext,
        };
        self.send_frame(adapter_id, &message, Some(&target)).await;
    }

    /// Pick the share whose session key seals an outbound message.
    ///
    /// Shares containing the message's document are preferred; remaining
    /// ties break on lexicographic session-key order, which both sides can
    /// compute identically.
    fn select_share(
        &self,
        state: &ProviderState,
        adapter_id: AdapterId,
        target: &PeerId,
        document: Option<&DocumentId>,
    ) -> Option<(ShareId, SessionKey)> {
        let mut candidates: Vec<(ShareId, SessionKey, bool)> = Vec::new();
        for (share_id, share) in state.registry.shares() {
            let sid = SessionId {
                share_id: share_id.clone(),
                adapter_id,
                peer_id: target.clone(),
            };
            let key = state
                .sessions
                .get(&sid)
                .filter(|session| session.state() == SessionState::Connected)
                .and_then(|session| session.session_key().cloned());
            if let Some(key) = key {
                let holds_document = document.is_some_and(|d| share.documents.contains(d));
                candidates.push((share_id.clone(), key, holds_document));
            }
        }
        candidates.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.1.cmp(&b.1)));
        candidates
            .into_iter()
            .next()
            .map(|(share_id, key, _)| (share_id, key))
    }

    /// Open every missing session in the cross-product of known peers and
    /// known share ids (admitted shares and pending invitations alike).
    async fn open_all_sessions(&self, state: &mut ProviderState) {
        let share_ids = state.registry.all_share_ids();
        let peers: Vec<(AdapterId, Vec<PeerId>)> = state
            .registry
            .peers()
            .map(|(id, set)| (id, set.iter().cloned().collect()))
            .collect();

        for (adapter_id, adapter_peers) in peers {
            for peer_id in adapter_peers {
                for share_id in &share_ids {
                    let sid = SessionId {
                        share_id: share_id.clone(),
                        adapter_id,
                        peer_id: peer_id.clone(),
                    };
                    if !state.sessions.contains_key(&sid) {
                        self.open_session(state, sid).await;
                    }
                }
            }
        }
    }

    /// Create, start, and catch up one session.
    async fn open_session(&self, state: &mut ProviderState, sid: SessionId) {
        let Some(ctx) = self.connection_context(state, &sid.share_id) else {
            return;
        };
        let session = match Session::new(sid.clone(), ctx) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(share = %sid.share_id, peer = %sid.peer_id, error = %e, "failed to create session");
                return;
            }
        };
        tracing::debug!(share = %sid.share_id, peer = %sid.peer_id, "opening session");
        state.sessions.insert(sid.clone(), session);

        let events = state
            .sessions
            .get_mut(&sid)
            .map(Session::start)
            .unwrap_or_default();
        self.process_connection_events(state, &sid, events).await;

        // Buffered payloads drain in arrival order, before any live frame
        // for this pair can be processed.
        let buffered = state.pending.drain(&sid);
        for bytes in buffered {
            if !state.sessions.contains_key(&sid) {
                break;
            }
            let events = state
                .sessions
                .get_mut(&sid)
                .map(|session| session.deliver(&bytes))
                .unwrap_or_default();
            self.process_connection_events(state, &sid, events).await;
        }
    }

    /// Handshake context for a share id, from its admitted team or pending
    /// invitation.
    fn connection_context(
        &self,
        state: &ProviderState,
        share_id: &ShareId,
    ) -> Option<ConnectionContext> {
        if let Some(share) = state.registry.share(share_id) {
            match &state.user {
                Some(user) => Some(ConnectionContext::Member {
                    device: self.device.clone(),
                    user: user.clone(),
                    team: share.team.clone(),
                }),
                None => {
                    tracing::warn!(share = %share_id, "cannot open member session without a user identity");
                    None
                }
            }
        } else if let Some(invitation) = state.registry.invitation(share_id) {
            let invitation = invitation.seed().clone();
            Some(match &state.user {
                Some(user) => ConnectionContext::InviteeMember {
                    device: self.device.clone(),
                    user: user.clone(),
                    invitation,
                },
                None => ConnectionContext::InviteeDevice {
                    device: self.device.clone(),
                    invitation,
                },
            })
        } else {
            None
        }
    }

    /// Apply one batch of connection effects to provider state.
    async fn process_connection_events(
        &self,
        state: &mut ProviderState,
        sid: &SessionId,
        events: Vec<ConnectionEvent>,
    ) {
        for event in events {
            match event {
                ConnectionEvent::Message(bytes) => {
                    let Some(local) = self.local_peer(sid.adapter_id) else {
                        continue;
                    };
                    let frame = WireMessage::Auth {
                        sender_id: local,
                        target_id: Some(sid.peer_id.clone()),
                        share_id: sid.share_id.clone(),
                        message: bytes,
                    };
                    self.send_frame(sid.adapter_id, &frame, Some(&sid.peer_id)).await;
                }
                ConnectionEvent::Joined { team, user } => {
                    tracing::info!(share = %sid.share_id, peer = %sid.peer_id, user = %user.user_id, "joined share");
                    let user_id = user.user_id.clone();
                    if state.user.is_none() {
                        state.user = Some(user);
                    }
                    // The consumed invitation migrates to a share atomically
                    // with the save below.
                    state.registry.take_invitation(&sid.share_id);
                    state.registry.admit_team(team);
                    if let Err(e) = self.save_state_locked(state).await {
                        tracing::error!(error = %e, "failed to persist state after join");
                    }
                    self.emit(ProviderEvent::Joined {
                        share_id: sid.share_id.clone(),
                        peer_id: sid.peer_id.clone(),
                        user_id,
                    });
                }
                ConnectionEvent::Connected { .. } => {
                    tracing::info!(share = %sid.share_id, peer = %sid.peer_id, "session connected");
                    let announced = state.announced.entry(sid.adapter_id).or_default();
                    if announced.insert(sid.peer_id.clone()) {
                        self.emit_upward(
                            sid.adapter_id,
                            AdapterEvent::PeerCandidate {
                                peer_id: sid.peer_id.clone(),
                            },
                        );
                    }
                    self.emit(ProviderEvent::Connected {
                        share_id: sid.share_id.clone(),
                        peer_id: sid.peer_id.clone(),
                    });
                }
                ConnectionEvent::Updated { team } => {
                    if !state.registry.update_team(team) {
                        tracing::warn!(share = %sid.share_id, "team update for a share that is not admitted");
                    }
                    if let Err(e) = self.save_state_locked(state).await {
                        tracing::error!(error = %e, "failed to persist state after team update");
                    }
                    self.emit(ProviderEvent::Updated {
                        share_id: sid.share_id.clone(),
                        peer_id: sid.peer_id.clone(),
                    });
                }
                ConnectionEvent::LocalError(reason) => {
                    tracing::debug!(share = %sid.share_id, peer = %sid.peer_id, reason = %reason, "handshake local error");
                    self.emit(ProviderEvent::LocalError {
                        share_id: sid.share_id.clone(),
                        peer_id: sid.peer_id.clone(),
                        reason,
                    });
                }
                ConnectionEvent::RemoteError(reason) => {
                    tracing::debug!(share = %sid.share_id, peer = %sid.peer_id, reason = %reason, "handshake remote error");
                    self.emit(ProviderEvent::RemoteError {
                        share_id: sid.share_id.clone(),
                        peer_id: sid.peer_id.clone(),
                        reason,
                    });
                }
                ConnectionEvent::Disconnected => {
                    state.sessions.remove(sid);
                    self.emit(ProviderEvent::Disconnected {
                        share_id: sid.share_id.clone(),
                        peer_id: sid.peer_id.clone(),
                    });
                }
            }
        }
    }

    /// Remove all sessions matching `matches`, emitting `Disconnected` for
    /// each.
    fn close_sessions(&self, state: &mut ProviderState, matches: impl Fn(&SessionId) -> bool) {
        let removed: Vec<SessionId> = state.sessions.keys().filter(|sid| matches(sid)).cloned().collect();
        for sid in removed {
            state.sessions.remove(&sid);
            self.emit(ProviderEvent::Disconnected {
                share_id: sid.share_id,
                peer_id: sid.peer_id,
            });
        }
    }

    /// Serialize the share set (and user identity) to storage. Writes are
    /// serialized by the state lock; last writer wins on the single blob.
    async fn save_state_locked(&self, state: &ProviderState) -> Result<()> {
        let wrap_key = self.device.wrap_key();
        let mut container = ShareContainer::new();
        for (share_id, share) in state.registry.shares() {
            container.insert(
                share_id.as_str().to_string(),
                persist::seal_share(&share.team, &wrap_key)?,
            );
        }
        let blob = persist::encode_container(&container)?;
        self.storage.save(&persist::SHARES_KEY, blob).await?;

        if let Some(user) = &state.user {
            let doc = serde_cbor::to_vec(user).map_err(vouch_crypto::CryptoError::from)?;
            let sealed = symmetric::seal(&doc, &wrap_key)?;
            self.storage.save(&persist::USER_KEY, sealed).await?;
        }
        Ok(())
    }

    /// Encode and transmit one frame on a base adapter; failures surface as
    /// `Error` events on the corresponding authenticated adapter.
    async fn send_frame(&self, adapter_id: AdapterId, frame: &WireMessage, peer: Option<&PeerId>) {
        let Some(base) = self.base(adapter_id) else {
            tracing::warn!(adapter = %adapter_id, "send on unknown adapter");
            return;
        };
        match frame.encode() {
            Ok(bytes) => {
                if let Err(e) = base.send(bytes).await {
                    tracing::warn!(adapter = %adapter_id, error = %e, "failed to send frame");
                    self.emit_upward(
                        adapter_id,
                        AdapterEvent::Error {
                            peer_id: peer.cloned(),
                            reason: format!("failed to send frame: {e}"),
                        },
                    );
                }
            }
            Err(e) => {
                tracing::error!(adapter = %adapter_id, error = %e, "failed to encode frame");
            }
        }
    }

    fn base(&self, adapter_id: AdapterId) -> Option<Arc<dyn NetworkAdapter>> {
        self.adapters
            .get(&adapter_id)
            .map(|handle| Arc::clone(&handle.base))
    }

    fn local_peer(&self, adapter_id: AdapterId) -> Option<PeerId> {
        self.adapters
            .get(&adapter_id)
            .map(|handle| handle.local.clone())
    }

    fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    fn emit_upward(&self, adapter_id: AdapterId, event: AdapterEvent) {
        let Some(upward) = self
            .adapters
            .get(&adapter_id)
            .map(|handle| handle.upward.clone())
        else {
            return;
        };
        let _ = upward.send(event);
    }
}
