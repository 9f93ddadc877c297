//! Fixtures and event-waiting utilities for integration tests.

use serde_cbor::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;
use vouch_core::{
    AuthProvider, AuthProviderConfig, AuthenticatedAdapter, MemoryStorage, ProviderEvent,
};
use vouch_crypto::{DeviceIdentity, Team, UserIdentity};
use vouch_transport::{AdapterEvent, NetworkAdapter};

/// How long an expected event may take before the test fails
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Install the test log subscriber (idempotent).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// One test endpoint: identities, storage, and a provider built from them.
pub struct TestPeer {
    pub user: UserIdentity,
    pub device: DeviceIdentity,
    pub storage: MemoryStorage,
    pub provider: AuthProvider,
}

impl TestPeer {
    /// A peer with a user identity (the common case).
    pub async fn with_user(name: &str) -> Self {
        let user = UserIdentity::generate(name).unwrap();
        let device = DeviceIdentity::generate(format!("{name}-device"), name).unwrap();
        let storage = MemoryStorage::new();
        let provider = AuthProvider::new(AuthProviderConfig {
            device: device.clone(),
            user: Some(user.clone()),
            storage: Arc::new(storage.clone()),
        });
        provider.ready().await;
        Self {
            user,
            device,
            storage,
            provider,
        }
    }

    /// A fresh device with no user identity yet (joins via invitation).
    pub async fn without_user(name: &str, claimed_user: &str) -> Self {
        let user = UserIdentity::generate(claimed_user).unwrap(); // unused by the provider
        let device = DeviceIdentity::generate(format!("{name}-device"), claimed_user).unwrap();
        let storage = MemoryStorage::new();
        let provider = AuthProvider::new(AuthProviderConfig {
            device: device.clone(),
            user: None,
            storage: Arc::new(storage.clone()),
        });
        provider.ready().await;
        Self {
            user,
            device,
            storage,
            provider,
        }
    }

    /// Rebuild the provider from this peer's identities and storage, as a
    /// process restart would.
    pub async fn restart(&self, with_user: bool) -> AuthProvider {
        let provider = AuthProvider::new(AuthProviderConfig {
            device: self.device.clone(),
            user: with_user.then(|| self.user.clone()),
            storage: Arc::new(self.storage.clone()),
        });
        provider.ready().await;
        provider
    }

    /// Found a team owned by this peer.
    pub fn create_team(&self) -> Team {
        Team::create(&self.user, &self.device).unwrap()
    }
}

/// Wait for the first provider event matching `pred`.
pub async fn provider_event(
    rx: &mut broadcast::Receiver<ProviderEvent>,
    what: &str,
    pred: impl Fn(&ProviderEvent) -> bool,
) -> ProviderEvent {
    timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event channel closed while waiting for {what}")
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Wait for the first adapter event matching `pred`, returning all events
/// observed on the way (matching one last).
pub async fn adapter_events_until(
    adapter: &Arc<AuthenticatedAdapter>,
    what: &str,
    pred: impl Fn(&AdapterEvent) -> bool,
) -> Vec<AdapterEvent> {
    timeout(EVENT_TIMEOUT, async {
        let mut seen = Vec::new();
        loop {
            let event = adapter
                .next_event()
                .await
                .unwrap_or_else(|| panic!("adapter closed while waiting for {what}"));
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Assert that no adapter event matching `pred` arrives within `window`.
pub async fn assert_no_adapter_event(
    adapter: &Arc<AuthenticatedAdapter>,
    window: Duration,
    pred: impl Fn(&AdapterEvent) -> bool,
) {
    let result = timeout(window, async {
        loop {
            match adapter.next_event().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(
        result.is_err(),
        "unexpected adapter event: {:?}",
        result.unwrap()
    );
}

/// Build a plaintext repository message frame.
pub fn sync_message(
    sender: &str,
    target: &str,
    document: Option<&str>,
    payload: &[u8],
) -> Vec<u8> {
    let mut map = BTreeMap::new();
    map.insert(Value::Text("type".into()), Value::Text("sync".into()));
    map.insert(Value::Text("senderId".into()), Value::Text(sender.into()));
    map.insert(Value::Text("targetId".into()), Value::Text(target.into()));
    if let Some(document) = document {
        map.insert(
            Value::Text("documentId".into()),
            Value::Text(document.into()),
        );
    }
    map.insert(Value::Text("data".into()), Value::Bytes(payload.to_vec()));
    serde_cbor::to_vec(&Value::Map(map)).unwrap()
}
