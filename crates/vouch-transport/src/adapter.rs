//! Network adapter trait and adapter events.
//!
//! This module defines the `NetworkAdapter` trait that abstracts over
//! transport backends. The authenticated layer both consumes it (the wrapped
//! base adapter) and implements it (the virtual adapter presented to the
//! repository), so the two sides of a wrap share one event vocabulary.

use async_trait::async_trait;
use thiserror::Error;

/// Identifier of a remote peer.
///
/// Scoped to the adapter that reported it: the same string on two adapters
/// names two distinct peers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(String);

impl PeerId {
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

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Adapter is closed
    #[error("adapter is closed")]
    Closed,

    /// Frame could not be delivered
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Adapter-specific error
    #[error("transport error: {0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Lifecycle and traffic events reported by an adapter.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// The adapter is connected and ready to carry frames
    Ready,
    /// A peer became reachable
    PeerCandidate {
        /// The peer that appeared
        peer_id: PeerId,
    },
    /// A peer went away
    PeerDisconnected {
        /// The peer that left
        peer_id: PeerId,
    },
    /// An inbound frame
    Message {
        /// Encoded frame bytes
        data: Vec<u8>,
    },
    /// A transport-level error; does not imply the adapter is closed
    Error {
        /// Peer the error is attributed to, when known
        peer_id: Option<PeerId>,
        /// Human-readable description
        reason: String,
    },
    /// The adapter shut down; no further events follow
    Closed,
}

/// Async adapter trait for peer-to-peer frame transport.
///
/// # Examples
///
/// ```no_run
/// use vouch_transport::{MemoryAdapter, NetworkAdapter};
///
/// # async fn example() {
/// let (alice, bob) = MemoryAdapter::pair("alice", "bob");
/// alice.send(b"hello".to_vec()).await.unwrap();
/// while let Some(event) = bob.next_event().await {
///     println!("bob saw {event:?}");
/// }
/// # }
/// ```
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    /// The peer id this adapter answers to on its network.
    fn local_peer_id(&self) -> PeerId;

    /// Send one encoded frame.
    ///
    /// Frames between the same two peers arrive in the order they were sent.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` after `Closed` was emitted, or a
    /// send error from the backend.
    async fn send(&self, frame: Vec<u8>) -> TransportResult<()>;

    /// Wait for the next adapter event.
    ///
    /// Returns `None` once the adapter is closed and drained.
    async fn next_event(&self) -> Option<AdapterEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_display_and_eq() {
        let a = PeerId::new("peer-1");
        let b = PeerId::from("peer-1");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "peer-1");
        assert_eq!(a.as_str(), "peer-1");
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Closed.to_string(), "adapter is closed");
        assert!(
            TransportError::SendFailed("queue gone".into())
                .to_string()
                .contains("queue gone")
        );
    }
}
