//! The authenticated (virtual) adapter.
//!
//! [`AuthenticatedAdapter`] is what the repository sees after a base adapter
//! is wrapped. It implements the same [`NetworkAdapter`] trait as the base,
//! so the repository cannot tell the difference; the provider behind it
//! swallows handshake traffic, decrypts sealed frames, and withholds
//! `PeerCandidate` until a peer has actually authenticated for some share.
//!
//! The wrapper holds only a weak reference to the provider: the provider
//! owns sessions which indirectly reference base adapters, and a strong
//! back-edge here would complete a cycle.

use crate::provider::ProviderInner;
use async_trait::async_trait;
use std::sync::Weak;
use tokio::sync::{Mutex, mpsc};
use vouch_transport::{AdapterEvent, NetworkAdapter, PeerId, TransportError, TransportResult};

/// Identifier of one wrapped adapter within a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdapterId(u64);

impl AdapterId {
    /// Wrap a numeric id.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AdapterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "adapter-{}", self.0)
    }
}

/// Virtual adapter presented to the repository in place of the base adapter.
pub struct AuthenticatedAdapter {
    id: AdapterId,
    local: PeerId,
    provider: Weak<ProviderInner>,
    events: Mutex<mpsc::UnboundedReceiver<AdapterEvent>>,
}

impl AuthenticatedAdapter {
    pub(crate) fn new(
        id: AdapterId,
        local: PeerId,
        provider: Weak<ProviderInner>,
        events: mpsc::UnboundedReceiver<AdapterEvent>,
    ) -> Self {
        Self {
            id,
            local,
            provider,
            events: Mutex::new(events),
        }
    }

    /// Id of this wrapper within its provider.
    #[must_use]
    pub fn id(&self) -> AdapterId {
        self.id
    }
}

#[async_trait]
impl NetworkAdapter for AuthenticatedAdapter {
    fn local_peer_id(&self) -> PeerId {
        self.local.clone()
    }

    /// Send a plaintext repository message.
    ///
    /// The provider picks a share with an authenticated session to the
    /// message's `targetId`, seals the message under that session key, and
    /// transmits it via the base adapter. Routing failures (unknown target,
    /// no authenticated share) surface as `Error` events on this adapter
    /// rather than as a returned error, so the repository's send path never
    /// observes them as exceptions.
    async fn send(&self, frame: Vec<u8>) -> TransportResult<()> {
        let Some(provider) = self.provider.upgrade() else {
            return Err(TransportError::Closed);
        };
        provider.send_from_repo(self.id, frame).await;
        Ok(())
    }

    async fn next_event(&self) -> Option<AdapterEvent> {
        self.events.lock().await.recv().await
    }
}

impl std::fmt::Debug for AuthenticatedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedAdapter")
            .field("id", &self.id)
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_id_display_and_order() {
        assert_eq!(AdapterId::new(3).to_string(), "adapter-3");
        assert!(AdapterId::new(1) < AdapterId::new(2));
    }
}
