//! Pending-message buffer.
//!
//! Handshake payloads can arrive before the session that should consume them
//! exists: share admission and peer arrival are independently timed. This
//! buffer queues such orphans per (share, adapter, peer) in arrival order
//! and hands them over exactly once when the session is created. A drained
//! entry is gone even if the session later fails.

use crate::adapter::AdapterId;
use crate::session::SessionId;
use std::collections::{HashMap, VecDeque};
use vouch_transport::PeerId;

/// FIFO queues of handshake payloads awaiting their session.
///
/// An empty queue is equivalent to an absent one.
#[derive(Debug, Default)]
pub struct PendingMessages {
    queues: HashMap<SessionId, VecDeque<Vec<u8>>>,
}

impl PendingMessages {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload to the queue for `id`.
    pub fn push(&mut self, id: SessionId, payload: Vec<u8>) {
        tracing::debug!(
            share = %id.share_id,
            peer = %id.peer_id,
            "buffering handshake payload for absent session"
        );
        self.queues.entry(id).or_default().push_back(payload);
    }

    /// Remove and return all payloads for `id`, in arrival order.
    pub fn drain(&mut self, id: &SessionId) -> Vec<Vec<u8>> {
        self.queues
            .remove(id)
            .map(|queue| queue.into_iter().collect())
            .unwrap_or_default()
    }

    /// Drop all payloads buffered for a peer on one adapter.
    pub fn remove_peer(&mut self, adapter_id: AdapterId, peer_id: &PeerId) {
        self.queues
            .retain(|id, _| !(id.adapter_id == adapter_id && &id.peer_id == peer_id));
    }

    /// Drop all payloads buffered for one adapter.
    pub fn remove_adapter(&mut self, adapter_id: AdapterId) {
        self.queues.retain(|id, _| id.adapter_id != adapter_id);
    }

    /// Number of payloads buffered for `id`.
    #[must_use]
    pub fn len(&self, id: &SessionId) -> usize {
        self.queues.get(id).map_or(0, VecDeque::len)
    }

    /// Whether nothing is buffered anywhere.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
