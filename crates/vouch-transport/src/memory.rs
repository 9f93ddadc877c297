//! In-process adapter pair.
//!
//! Two [`MemoryAdapter`]s created by [`MemoryAdapter::pair`] form a duplex
//! link with ordered, lossless delivery. On creation each side queues
//! `Ready` followed by `PeerCandidate` for the remote end, mirroring what a
//! real transport reports once a connection is up. Used by the test suites
//! and by embedders that colocate two endpoints in one process.

use crate::adapter::{AdapterEvent, NetworkAdapter, PeerId, TransportError, TransportResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

/// One end of an in-process duplex link.
pub struct MemoryAdapter {
    local: PeerId,
    remote: PeerId,
    /// Feeds the remote side's event queue.
    to_remote: mpsc::UnboundedSender<AdapterEvent>,
    /// Feeds our own event queue (used for close/disconnect signalling).
    to_local: mpsc::UnboundedSender<AdapterEvent>,
    events: Mutex<mpsc::UnboundedReceiver<AdapterEvent>>,
    closed: AtomicBool,
}

impl MemoryAdapter {
    /// Create a connected adapter pair.
    ///
    /// Each side will report `Ready` and then `PeerCandidate` for the other
    /// end as its first two events.
    #[must_use]
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Arc<Self>, Arc<Self>) {
        let a = PeerId::new(a);
        let b = PeerId::new(b);
        let (to_a, from_a) = mpsc::unbounded_channel();
        let (to_b, from_b) = mpsc::unbounded_channel();

        for (tx, remote) in [(&to_a, &b), (&to_b, &a)] {
            let _ = tx.send(AdapterEvent::Ready);
            let _ = tx.send(AdapterEvent::PeerCandidate {
                peer_id: remote.clone(),
            });
        }

        let left = Arc::new(Self {
            local: a.clone(),
            remote: b.clone(),
            to_remote: to_b.clone(),
            to_local: to_a.clone(),
            events: Mutex::new(from_a),
            closed: AtomicBool::new(false),
        });
        let right = Arc::new(Self {
            local: b,
            remote: a,
            to_remote: to_a,
            to_local: to_b,
            events: Mutex::new(from_b),
            closed: AtomicBool::new(false),
        });
        (left, right)
    }

    /// Signal loss of the link's peer on both ends without closing either
    /// adapter.
    pub fn disconnect(&self) {
        let _ = self.to_remote.send(AdapterEvent::PeerDisconnected {
            peer_id: self.local.clone(),
        });
        let _ = self.to_local.send(AdapterEvent::PeerDisconnected {
            peer_id: self.remote.clone(),
        });
    }

    /// Close this end: the remote side sees the peer disappear, this side
    /// sees `Closed`, and further sends fail.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(local = %self.local, "memory adapter closing");
        let _ = self.to_remote.send(AdapterEvent::PeerDisconnected {
            peer_id: self.local.clone(),
        });
        let _ = self.to_local.send(AdapterEvent::Closed);
    }
}

#[async_trait]
impl NetworkAdapter for MemoryAdapter {
    fn local_peer_id(&self) -> PeerId {
        self.local.clone()
    }

    async fn send(&self, frame: Vec<u8>) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.to_remote
            .send(AdapterEvent::Message { data: frame })
            .map_err(|_| TransportError::SendFailed("remote adapter dropped".to_string()))
    }

    async fn next_event(&self) -> Option<AdapterEvent> {
        let mut events = self.events.lock().await;
        let event = events.recv().await;
        if matches!(event, Some(AdapterEvent::Closed)) {
            events.close();
        }
        event
    }
}
