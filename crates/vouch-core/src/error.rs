//! Error types for the authenticated provider layer.
//!
//! Errors are categorized by the boundary they occur at. The provider never
//! lets one cross a component boundary as a panic: handlers catch, log with
//! context, and surface an error event at the nearest adapter or provider
//! surface.

use crate::store::StorageError;
use crate::wire::WireError;
use thiserror::Error;
use vouch_crypto::{CryptoError, ShareId};
use vouch_transport::{PeerId, TransportError};

/// Errors surfaced by the authenticated provider
#[derive(Debug, Error)]
pub enum AuthError {
    /// A frame failed to decode or classify
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// A cryptographic operation failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The underlying adapter failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The persistence backend failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No share has an authenticated session with the target peer
    #[error("no share for peer {0}")]
    NoShareForPeer(PeerId),

    /// The named share is not registered
    #[error("unknown share: {0}")]
    UnknownShare(ShareId),

    /// An outbound repository message was missing required fields
    #[error("invalid outbound message: {0}")]
    InvalidOutbound(String),
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, AuthError>;
