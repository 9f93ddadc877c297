//! The per-peer share handshake.
//!
//! One [`Connection`] runs the handshake for one (share, peer) pair. It is
//! sans-io: [`Connection::start`] and [`Connection::deliver`] return the
//! resulting [`ConnectionEvent`]s, including serialized messages the caller
//! must transport to the remote side. Messages for one pair must be delivered
//! in the order they were produced; the protocol relies on it.
//!
//! Members prove knowledge of the team root secret with keyed MACs over
//! exchanged nonces. Invitees prove possession of an invitation secret and
//! receive the sealed team payload in return, after which they prove
//! membership like any member. Every verification failure answers with a
//! `Reject` so the far side fails fast instead of waiting forever.

use crate::error::{CryptoError, Result};
use crate::identity::{DeviceIdentity, UserIdentity};
use crate::symmetric::{self, SessionKey};
use crate::team::{InvitationKind, InvitationSeed, Keyring, Team};
use serde::{Deserialize, Serialize};

const MEMBER_PROOF_CONTEXT: &[u8] = b"vouch v1 member proof";
const SESSION_KEY_CONTEXT: &[u8] = b"vouch v1 session key";

/// Who we are on this connection, and what we bring to it.
#[derive(Debug, Clone)]
pub enum ConnectionContext {
    /// We hold the team and prove membership.
    Member {
        /// Local device
        device: DeviceIdentity,
        /// Local user
        user: UserIdentity,
        /// Working copy of the team
        team: Team,
    },
    /// We hold an invitation and no user identity yet.
    InviteeDevice {
        /// Local device
        device: DeviceIdentity,
        /// Invitation to redeem
        invitation: InvitationSeed,
    },
    /// We hold an invitation and an existing user identity.
    InviteeMember {
        /// Local device
        device: DeviceIdentity,
        /// Local user
        user: UserIdentity,
        /// Invitation to redeem
        invitation: InvitationSeed,
    },
}

impl ConnectionContext {
    fn device(&self) -> &DeviceIdentity {
        match self {
            Self::Member { device, .. }
            | Self::InviteeDevice { device, .. }
            | Self::InviteeMember { device, .. } => device,
        }
    }

    fn user(&self) -> Option<&UserIdentity> {
        match self {
            Self::Member { user, .. } | Self::InviteeMember { user, .. } => Some(user),
            Self::InviteeDevice { .. } => None,
        }
    }

    fn invitation(&self) -> Option<&InvitationSeed> {
        match self {
            Self::Member { .. } => None,
            Self::InviteeDevice { invitation, .. } | Self::InviteeMember { invitation, .. } => {
                Some(invitation)
            }
        }
    }
}

/// What a connection produced in response to `start` or `deliver`.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Serialized connection message to transport to the remote side
    Message(Vec<u8>),
    /// We were admitted to the team through our invitation
    Joined {
        /// The team we joined, including ourselves
        team: Team,
        /// Our user identity (received, generated, or pre-existing)
        user: UserIdentity,
    },
    /// Mutual authentication completed; traffic may now be encrypted
    Connected {
        /// Agreed session key
        key: SessionKey,
    },
    /// Our working copy of the team changed (e.g. we admitted an invitee)
    Updated {
        /// The changed team
        team: Team,
    },
    /// We detected a protocol or verification failure
    LocalError(String),
    /// The remote side reported a failure
    RemoteError(String),
    /// The connection is over; a new one is needed to retry
    Disconnected,
}

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Constructed, `start` not yet called
    Created,
    /// Hello sent, expecting the peer's hello
    Hailing,
    /// Peer identified; expecting their membership proof
    AwaitingProof,
    /// Invitation claimed; expecting the welcome package
    AwaitingWelcome,
    /// Session key agreed
    Connected,
    /// Terminal failure
    Failed,
}

#[derive(Serialize, Deserialize)]
enum HandshakeMessage {
    Hello {
        device_id: String,
        user_id: Option<String>,
        #[serde(with = "serde_bytes")]
        nonce: Vec<u8>,
        claim: Claim,
    },
    Proof {
        #[serde(with = "serde_bytes")]
        mac: Vec<u8>,
    },
    Welcome {
        #[serde(with = "serde_bytes")]
        sealed: Vec<u8>,
    },
    Reject {
        reason: String,
    },
}

#[derive(Serialize, Deserialize)]
enum Claim {
    Member,
    Invitee {
        invitation_id: String,
        #[serde(with = "serde_bytes")]
        proof: Vec<u8>,
    },
}

#[derive(Serialize, Deserialize)]
struct WelcomePackage {
    #[serde(with = "serde_bytes")]
    team: Vec<u8>,
    #[serde(with = "serde_bytes")]
    keyring: Vec<u8>,
    user_id: String,
    user: Option<UserIdentity>,
}

/// Handshake state machine for one (share, peer) pair.
pub struct Connection {
    ctx: ConnectionContext,
    phase: ConnectionPhase,
    my_nonce: [u8; 32],
    peer_nonce: Option<Vec<u8>>,
    peer_device: Option<String>,
    team: Option<Team>,
    session_key: Option<SessionKey>,
}

impl Connection {
    /// Create a connection for the given context.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Rng`] if nonce generation fails.
    pub fn new(ctx: ConnectionContext) -> Result<Self> {
        let mut my_nonce = [0u8; 32];
        getrandom::getrandom(&mut my_nonce).map_err(|e| CryptoError::Rng(e.to_string()))?;

        let team = match &ctx {
            ConnectionContext::Member { team, .. } => Some(team.clone()),
            _ => None,
        };

        Ok(Self {
            ctx,
            phase: ConnectionPhase::Created,
            my_nonce,
            peer_nonce: None,
            peer_device: None,
            team,
            session_key: None,
        })
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Session key, available once [`ConnectionPhase::Connected`].
    #[must_use]
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Begin the handshake: emits our hello.
    pub fn start(&mut self) -> Vec<ConnectionEvent> {
        if self.phase != ConnectionPhase::Created {
            return Vec::new();
        }
        self.phase = ConnectionPhase::Hailing;

        let claim = match self.ctx.invitation() {
            Some(seed) => Claim::Invitee {
                invitation_id: seed.invitation_id(),
                proof: seed.claim_proof(&self.my_nonce).to_vec(),
            },
            None => Claim::Member,
        };
        let hello = HandshakeMessage::Hello {
            device_id: self.ctx.device().device_id.clone(),
            user_id: self.ctx.user().map(|u| u.user_id.clone()),
            nonce: self.my_nonce.to_vec(),
            claim,
        };
        match encode(&hello) {
            Ok(bytes) => vec![ConnectionEvent::Message(bytes)],
            Err(e) => self.fail(format!("failed to encode hello: {e}")),
        }
    }

    /// Feed one serialized connection message received from the remote side.
    pub fn deliver(&mut self, bytes: &[u8]) -> Vec<ConnectionEvent> {
        match self.phase {
            ConnectionPhase::Failed => return Vec::new(),
            ConnectionPhase::Created => {
                return self.fail("message delivered before start".to_string());
            }
            ConnectionPhase::Connected => {
                // Late handshake traffic after agreement is harmless.
                tracing::debug!("ignoring handshake message on connected session");
                return Vec::new();
            }
            _ => {}
        }

        let message: HandshakeMessage = match serde_cbor::from_slice(bytes) {
            Ok(m) => m,
            Err(e) => return self.fail(format!("undecodable handshake message: {e}")),
        };

        match message {
            HandshakeMessage::Hello {
                device_id,
                user_id,
                nonce,
                claim,
            } => self.on_hello(device_id, user_id, nonce, claim),
            HandshakeMessage::Proof { mac } => self.on_proof(&mac),
            HandshakeMessage::Welcome { sealed } => self.on_welcome(&sealed),
            HandshakeMessage::Reject { reason } => {
                self.phase = ConnectionPhase::Failed;
                vec![
                    ConnectionEvent::RemoteError(reason),
                    ConnectionEvent::Disconnected,
                ]
            }
        }
    }

    fn on_hello(
        &mut self,
        device_id: String,
        _user_id: Option<String>,
        nonce: Vec<u8>,
        claim: Claim,
    ) -> Vec<ConnectionEvent> {
        if self.phase != ConnectionPhase::Hailing {
            return self.fail("unexpected hello".to_string());
        }
        self.peer_nonce = Some(nonce.clone());
        self.peer_device = Some(device_id.clone());

        match claim {
            Claim::Member => match &self.team {
                Some(team) => {
                    // Prove our own membership; their proof arrives next.
                    let mac = member_proof(team, &nonce, &self.my_nonce, &self.ctx.device().device_id);
                    self.phase = ConnectionPhase::AwaitingProof;
                    match encode(&HandshakeMessage::Proof { mac: mac.to_vec() }) {
                        Ok(bytes) => vec![ConnectionEvent::Message(bytes)],
                        Err(e) => self.fail(format!("failed to encode proof: {e}")),
                    }
                }
                // We are an invitee; the member will verify our claim and
                // answer with a welcome package.
                None => {
                    self.phase = ConnectionPhase::AwaitingWelcome;
                    Vec::new()
                }
            },
            Claim::Invitee {
                invitation_id,
                proof,
            } => self.on_invitee_hello(&invitation_id, &proof, &nonce, device_id),
        }
    }

    fn on_invitee_hello(
        &mut self,
        invitation_id: &str,
        proof: &[u8],
        nonce: &[u8],
        device_id: String,
    ) -> Vec<ConnectionEvent> {
        let Some(team) = self.team.as_mut() else {
            return self.fail("cannot admit an invitee without the team".to_string());
        };
        if let Err(e) = team.verify_invitation(invitation_id, nonce, proof) {
            return self.fail(format!("invitation claim rejected: {e}"));
        }

        let welcome_key = match team.invitation_welcome_key(invitation_id, nonce, &self.my_nonce) {
            Ok(key) => key,
            Err(e) => return self.fail(format!("invitation vanished: {e}")),
        };
        let (kind, user_id) = match team.consume_invitation(invitation_id, device_id) {
            Ok(details) => details,
            Err(e) => return self.fail(format!("invitation vanished: {e}")),
        };

        let user = match (&kind, self.ctx.user()) {
            // A new device of our own user receives the user keys.
            (InvitationKind::Device, Some(me)) if me.user_id == user_id => Some(me.clone()),
            _ => None,
        };

        let package = WelcomePackage {
            team: match team.save() {
                Ok(bytes) => bytes,
                Err(e) => return self.fail(format!("failed to seal team payload: {e}")),
            },
            keyring: team.keyring().to_bytes(),
            user_id,
            user,
        };
        let sealed = match serde_cbor::to_vec(&package)
            .map_err(CryptoError::from)
            .and_then(|doc| symmetric::seal(&doc, &welcome_key))
        {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(format!("failed to seal welcome package: {e}")),
        };

        let updated = team.clone();
        self.phase = ConnectionPhase::AwaitingProof;
        match encode(&HandshakeMessage::Welcome { sealed }) {
            Ok(bytes) => vec![
                ConnectionEvent::Updated { team: updated },
                ConnectionEvent::Message(bytes),
            ],
            Err(e) => self.fail(format!("failed to encode welcome: {e}")),
        }
    }

    fn on_proof(&mut self, mac: &[u8]) -> Vec<ConnectionEvent> {
        if self.phase != ConnectionPhase::AwaitingProof {
            return self.fail("unexpected proof".to_string());
        }
        let (Some(team), Some(peer_nonce), Some(peer_device)) =
            (&self.team, &self.peer_nonce, &self.peer_device)
        else {
            return self.fail("proof before hello".to_string());
        };

        let expected = member_proof(team, &self.my_nonce, peer_nonce, peer_device);
        if !mac_eq(&expected, mac) {
            return self.fail("membership proof rejected".to_string());
        }

        let key = session_key(team, &self.my_nonce, peer_nonce);
        self.session_key = Some(key.clone());
        self.phase = ConnectionPhase::Connected;
        vec![ConnectionEvent::Connected { key }]
    }

    fn on_welcome(&mut self, sealed: &[u8]) -> Vec<ConnectionEvent> {
        if self.phase != ConnectionPhase::AwaitingWelcome {
            return self.fail("unexpected welcome".to_string());
        }
        let Some(seed) = self.ctx.invitation().cloned() else {
            return self.fail("welcome without an invitation".to_string());
        };
        let Some(peer_nonce) = self.peer_nonce.clone() else {
            return self.fail("welcome before hello".to_string());
        };

        let welcome_key = seed.welcome_key(&self.my_nonce, &peer_nonce);
        let package: WelcomePackage = match symmetric::open(sealed, &welcome_key)
            .and_then(|doc| serde_cbor::from_slice(&doc).map_err(CryptoError::from))
        {
            Ok(p) => p,
            Err(e) => return self.fail(format!("welcome package rejected: {e}")),
        };

        let team = match Keyring::from_bytes(&package.keyring)
            .and_then(|keyring| Team::load(&package.team, &keyring))
        {
            Ok(team) => team,
            Err(e) => return self.fail(format!("team payload rejected: {e}")),
        };

        let user = match (self.ctx.user(), package.user) {
            (Some(me), _) => me.clone(),
            (None, Some(received)) => received,
            (None, None) => match UserIdentity::generate(package.user_id) {
                Ok(user) => user,
                Err(e) => return self.fail(format!("failed to mint user identity: {e}")),
            },
        };

        let mac = member_proof(&team, &peer_nonce, &self.my_nonce, &self.ctx.device().device_id);
        let key = session_key(&team, &self.my_nonce, &peer_nonce);
        self.team = Some(team.clone());
        self.session_key = Some(key.clone());
        self.phase = ConnectionPhase::Connected;

        match encode(&HandshakeMessage::Proof { mac: mac.to_vec() }) {
            Ok(bytes) => vec![
                ConnectionEvent::Joined { team, user },
                ConnectionEvent::Message(bytes),
                ConnectionEvent::Connected { key },
            ],
            Err(e) => self.fail(format!("failed to encode proof: {e}")),
        }
    }

    fn fail(&mut self, reason: String) -> Vec<ConnectionEvent> {
        tracing::debug!(reason = %reason, "handshake failed");
        self.phase = ConnectionPhase::Failed;
        let mut events = Vec::with_capacity(3);
        if let Ok(bytes) = encode(&HandshakeMessage::Reject {
            reason: reason.clone(),
        }) {
            events.push(ConnectionEvent::Message(bytes));
        }
        events.push(ConnectionEvent::LocalError(reason));
        events.push(ConnectionEvent::Disconnected);
        events
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("phase", &self.phase)
            .field("peer_device", &self.peer_device)
            .finish_non_exhaustive()
    }
}

fn encode(message: &HandshakeMessage) -> Result<Vec<u8>> {
    Ok(serde_cbor::to_vec(message)?)
}

/// MAC proving team membership, bound to both nonces and the prover's device.
fn member_proof(team: &Team, verifier_nonce: &[u8], prover_nonce: &[u8], prover_device: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_keyed(team.root_key().as_bytes());
    hasher.update(MEMBER_PROOF_CONTEXT);
    hasher.update(verifier_nonce);
    hasher.update(prover_nonce);
    hasher.update(prover_device.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Session key over the sorted nonce pair so both sides agree.
fn session_key(team: &Team, a: &[u8], b: &[u8]) -> SessionKey {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = blake3::Hasher::new_keyed(team.root_key().as_bytes());
    hasher.update(SESSION_KEY_CONTEXT);
    hasher.update(lo);
    hasher.update(hi);
    SessionKey::from_bytes(*hasher.finalize().as_bytes())
}

fn mac_eq(expected: &[u8; 32], got: &[u8]) -> bool {
    match <[u8; 32]>::try_from(got) {
        Ok(got) => blake3::Hash::from_bytes(*expected) == blake3::Hash::from_bytes(got),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Party {
        conn: Connection,
        outbox: Vec<Vec<u8>>,
        events: Vec<ConnectionEvent>,
    }

    impl Party {
        fn new(ctx: ConnectionContext) -> Self {
            let conn = Connection::new(ctx).unwrap();
            let mut party = Self {
                conn,
                outbox: Vec::new(),
                events: Vec::new(),
            };
            let events = party.conn.start();
            party.absorb(events);
            party
        }

        fn absorb(&mut self, events: Vec<ConnectionEvent>) {
            for event in events {
                match event {
                    ConnectionEvent::Message(bytes) => self.outbox.push(bytes),
                    other => self.events.push(other),
                }
            }
        }

        fn deliver_all(&mut self, messages: Vec<Vec<u8>>) {
            for message in messages {
                let events = self.conn.deliver(&message);
                self.absorb(events);
            }
        }

        fn connected(&self) -> bool {
            self.conn.phase() == ConnectionPhase::Connected
        }
    }

    /// Shuttle queued messages between two parties until both go quiet.
    fn pump(a: &mut Party, b: &mut Party) {
        loop {
            let from_a = std::mem::take(&mut a.outbox);
            let from_b = std::mem::take(&mut b.outbox);
            if from_a.is_empty() && from_b.is_empty() {
                break;
            }
            b.deliver_all(from_a);
            a.deliver_all(from_b);
        }
    }

    fn member_ctx(name: &str, team: &Team) -> ConnectionContext {
        ConnectionContext::Member {
            device: DeviceIdentity::generate(format!("{name}-device"), name).unwrap(),
            user: UserIdentity::generate(name).unwrap(),
            team: team.clone(),
        }
    }

    #[test]
    fn test_member_member_handshake() {
        let alice = UserIdentity::generate("alice").unwrap();
        let alice_device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let mut team = Team::create(&alice, &alice_device).unwrap();
        team.admit("bob", "bob-laptop");

        let mut a = Party::new(member_ctx("alice", &team));
        let mut b = Party::new(member_ctx("bob", &team));
        pump(&mut a, &mut b);

        assert!(a.connected());
        assert!(b.connected());
        assert_eq!(
            a.conn.session_key().unwrap().as_bytes(),
            b.conn.session_key().unwrap().as_bytes()
        );
    }

    #[test]
    fn test_member_invitee_join() {
        let alice = UserIdentity::generate("alice").unwrap();
        let alice_device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let mut team = Team::create(&alice, &alice_device).unwrap();
        let seed = team.invite_member("bob").unwrap();

        let mut a = Party::new(ConnectionContext::Member {
            device: alice_device,
            user: alice,
            team,
        });
        let mut b = Party::new(ConnectionContext::InviteeDevice {
            device: DeviceIdentity::generate("bob-phone", "bob").unwrap(),
            invitation: seed,
        });
        pump(&mut a, &mut b);

        assert!(a.connected());
        assert!(b.connected());

        // The member observed the team change.
        assert!(a
            .events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Updated { team } if team.is_member("bob"))));

        // The invitee joined and received a matching team and fresh identity.
        let joined = b
            .events
            .iter()
            .find_map(|e| match e {
                ConnectionEvent::Joined { team, user } => Some((team, user)),
                _ => None,
            })
            .expect("invitee must join");
        assert!(joined.0.is_member("bob"));
        assert_eq!(joined.1.user_id, "bob");

        assert_eq!(
            a.conn.session_key().unwrap().as_bytes(),
            b.conn.session_key().unwrap().as_bytes()
        );
    }

    #[test]
    fn test_joined_precedes_connected() {
        let alice = UserIdentity::generate("alice").unwrap();
        let alice_device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let mut team = Team::create(&alice, &alice_device).unwrap();
        let seed = team.invite_member("bob").unwrap();

        let mut a = Party::new(ConnectionContext::Member {
            device: alice_device,
            user: alice,
            team,
        });
        let mut b = Party::new(ConnectionContext::InviteeDevice {
            device: DeviceIdentity::generate("bob-phone", "bob").unwrap(),
            invitation: seed,
        });
        pump(&mut a, &mut b);

        let joined_at = b
            .events
            .iter()
            .position(|e| matches!(e, ConnectionEvent::Joined { .. }))
            .unwrap();
        let connected_at = b
            .events
            .iter()
            .position(|e| matches!(e, ConnectionEvent::Connected { .. }))
            .unwrap();
        assert!(joined_at < connected_at);
    }

    #[test]
    fn test_device_invitation_transfers_user_identity() {
        let alice = UserIdentity::generate("alice").unwrap();
        let laptop = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let mut team = Team::create(&alice, &laptop).unwrap();
        let seed = team.invite_device("alice").unwrap();

        let mut a = Party::new(ConnectionContext::Member {
            device: laptop,
            user: alice.clone(),
            team,
        });
        let mut b = Party::new(ConnectionContext::InviteeDevice {
            device: DeviceIdentity::generate("alice-phone", "alice").unwrap(),
            invitation: seed,
        });
        pump(&mut a, &mut b);

        let joined_user = b
            .events
            .iter()
            .find_map(|e| match e {
                ConnectionEvent::Joined { user, .. } => Some(user.clone()),
                _ => None,
            })
            .expect("device must join");
        // The phone now holds the same user keys as the laptop.
        assert_eq!(joined_user.keys.public_bytes(), alice.keys.public_bytes());
    }

    #[test]
    fn test_wrong_team_is_rejected() {
        let alice = UserIdentity::generate("alice").unwrap();
        let alice_device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let team_a = Team::create(&alice, &alice_device).unwrap();

        let mallory = UserIdentity::generate("mallory").unwrap();
        let mallory_device = DeviceIdentity::generate("mallory-pc", "mallory").unwrap();
        let team_m = Team::create(&mallory, &mallory_device).unwrap();

        let mut a = Party::new(member_ctx("alice", &team_a));
        let mut m = Party::new(member_ctx("mallory", &team_m));
        pump(&mut a, &mut m);

        assert_eq!(a.conn.phase(), ConnectionPhase::Failed);
        assert_eq!(m.conn.phase(), ConnectionPhase::Failed);
        assert!(a.events.iter().any(|e| matches!(
            e,
            ConnectionEvent::LocalError(_) | ConnectionEvent::RemoteError(_)
        )));
        assert!(a
            .events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Disconnected)));
    }

    #[test]
    fn test_unknown_invitation_is_rejected() {
        let alice = UserIdentity::generate("alice").unwrap();
        let alice_device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let team = Team::create(&alice, &alice_device).unwrap();

        // An invitation minted on a different team instance is unknown here.
        let mut other = Team::create(&alice, &alice_device).unwrap();
        let seed = other.invite_member("bob").unwrap();

        let mut a = Party::new(ConnectionContext::Member {
            device: alice_device,
            user: alice,
            team,
        });
        let mut b = Party::new(ConnectionContext::InviteeDevice {
            device: DeviceIdentity::generate("bob-phone", "bob").unwrap(),
            invitation: seed,
        });
        pump(&mut a, &mut b);

        assert_eq!(a.conn.phase(), ConnectionPhase::Failed);
        assert!(b
            .events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::RemoteError(_))));
    }

    #[test]
    fn test_garbage_input_fails_with_reject() {
        let alice = UserIdentity::generate("alice").unwrap();
        let alice_device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let team = Team::create(&alice, &alice_device).unwrap();

        let mut conn = Connection::new(member_ctx("alice", &team)).unwrap();
        let _ = conn.start();
        let events = conn.deliver(b"not cbor at all");

        assert_eq!(conn.phase(), ConnectionPhase::Failed);
        assert!(events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Message(_))));
        assert!(events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Disconnected)));
    }

    #[test]
    fn test_failed_connection_goes_quiet() {
        let alice = UserIdentity::generate("alice").unwrap();
        let alice_device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let team = Team::create(&alice, &alice_device).unwrap();

        let mut conn = Connection::new(member_ctx("alice", &team)).unwrap();
        let _ = conn.start();
        let _ = conn.deliver(b"garbage");
        assert!(conn.deliver(b"more garbage").is_empty());
    }

    #[test]
    fn test_session_key_only_after_connected() {
        let alice = UserIdentity::generate("alice").unwrap();
        let alice_device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let team = Team::create(&alice, &alice_device).unwrap();

        let mut conn = Connection::new(member_ctx("alice", &team)).unwrap();
        assert!(conn.session_key().is_none());
        let _ = conn.start();
        assert!(conn.session_key().is_none());
    }

    #[test]
    fn test_start_is_idempotent() {
        let alice = UserIdentity::generate("alice").unwrap();
        let alice_device = DeviceIdentity::generate("alice-laptop", "alice").unwrap();
        let team = Team::create(&alice, &alice_device).unwrap();

        let mut conn = Connection::new(member_ctx("alice", &team)).unwrap();
        assert_eq!(conn.start().len(), 1);
        assert!(conn.start().is_empty());
    }
}
