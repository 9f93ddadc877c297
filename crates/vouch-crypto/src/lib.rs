//! # Vouch Crypto
//!
//! Cryptographic engine for the Vouch authenticated-sync layer.
//!
//! This crate provides:
//! - **Identities**: device and user keypairs (Ed25519) and derived wrap keys
//! - **Symmetric sealing**: XChaCha20-Poly1305 with embedded nonces
//! - **Team state**: membership document, root secret keyring, invitations
//! - **Share handshake**: the per-peer connection state machine that proves
//!   team membership (or consumes an invitation) and agrees on a session key
//!
//! The handshake connection is sans-io: callers feed it serialized messages
//! via [`Connection::deliver`] and act on the returned [`ConnectionEvent`]s.
//! The provider layer above never inspects handshake internals; it only
//! transports opaque connection messages and reacts to events.
//!
//! ## Handshake overview
//!
//! ```text
//! Member A                          Member B
//!    |------ Hello (nonce, claim) ---->|
//!    |<----- Hello (nonce, claim) -----|
//!    |------ Proof (keyed MAC) ------->|
//!    |<----- Proof (keyed MAC) --------|
//!    |        [Connected: session key] |
//!
//! Member                            Invitee
//!    |<----- Hello (invitation proof) -|
//!    |------ Welcome (sealed team) --->|
//!    |<----- Proof (keyed MAC) --------|
//!    |        [Joined + Connected]     |
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod identity;
pub mod symmetric;
pub mod team;

pub use connection::{Connection, ConnectionContext, ConnectionEvent, ConnectionPhase};
pub use error::CryptoError;
pub use identity::{DeviceIdentity, KeyPair, UserIdentity};
pub use symmetric::{SessionKey, SymmetricKey, open, seal};
pub use team::{InvitationKind, InvitationSeed, Keyring, ShareId, Team};

/// Length of all symmetric secrets, nonce seeds, and MACs used by this crate
pub const SECRET_LEN: usize = 32;
