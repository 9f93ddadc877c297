//! # Vouch Core
//!
//! Authenticated, encrypted transport wrapping for peer-to-peer document
//! sync. The provider sits between a document-sync repository and its
//! network adapters: it intercepts raw peer traffic, runs a mutual
//! authentication and key agreement handshake per share (a group of
//! co-owners of a set of documents), and transparently encrypts and
//! decrypts all further sync traffic.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Repository                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  AuthenticatedAdapter      (virtual; same trait as the base)│
//! ├─────────────────────────────────────────────────────────────┤
//! │  AuthProvider                                               │
//! │   registry │ sessions │ pending buffer │ persistence        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  classifier: auth → session | encrypted → open | other → up │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     base NetworkAdapter                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vouch_core::{AuthProvider, AuthProviderConfig, MemoryStorage};
//! use vouch_crypto::{DeviceIdentity, Team, UserIdentity};
//! use vouch_transport::MemoryAdapter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let user = UserIdentity::generate("alice")?;
//! let device = DeviceIdentity::generate("alice-laptop", "alice")?;
//! let team = Team::create(&user, &device)?;
//!
//! let provider = AuthProvider::new(AuthProviderConfig {
//!     device,
//!     user: Some(user),
//!     storage: Arc::new(MemoryStorage::new()),
//! });
//! provider.ready().await;
//!
//! let (adapter, _remote) = MemoryAdapter::pair("alice", "bob");
//! let authenticated = provider.wrap(adapter);
//! provider.add_team(team).await?;
//! // Hand `authenticated` to the repository as if it were the base adapter.
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod buffer;
pub mod error;
pub mod events;
pub mod persist;
pub mod provider;
pub mod registry;
pub mod session;
pub mod store;
pub mod wire;

pub use adapter::{AdapterId, AuthenticatedAdapter};
pub use buffer::PendingMessages;
pub use error::{AuthError, Result};
pub use events::ProviderEvent;
pub use persist::{SHARES_KEY, SealedShare, ShareContainer, USER_KEY};
pub use provider::{AuthProvider, AuthProviderConfig};
pub use registry::{DocumentId, Invitation, Share, ShareRegistry};
pub use session::{Session, SessionId, SessionState};
pub use store::{MemoryStorage, Storage, StorageError};
pub use wire::{WireError, WireMessage};
