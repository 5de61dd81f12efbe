use std::sync::Arc;

use {
    async_trait::async_trait,
    dashmap::{DashMap, mapref::entry::Entry},
    tokio::sync::watch,
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use herald_metrics::{channels as ch_metrics, counter, gauge};

use crate::{
    ChannelConfig, ClientFactory, Error, Result, SenderStore,
    address::normalize_recipient,
    outbound::ChannelOutbound,
    session::{ChannelSession, SessionContext, SessionMap},
    state::{ChannelSnapshot, ChannelState},
};

/// In-memory registry of live channel sessions, keyed by channel id.
///
/// An id absent from the registry is treated as `Uninitialized`.
pub struct ChannelRegistry {
    sessions: SessionMap,
    factory: Arc<dyn ClientFactory>,
    store: Option<Arc<dyn SenderStore>>,
}

impl ChannelRegistry {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            factory,
            store: None,
        }
    }

    /// Persist newly bound accounts through `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn SenderStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            factory: Arc::clone(&self.factory),
            store: self.store.clone(),
            sessions: Arc::clone(&self.sessions),
        }
    }

    fn session(&self, channel_id: &str) -> Option<Arc<ChannelSession>> {
        self.sessions.get(channel_id).map(|e| Arc::clone(e.value()))
    }

    /// Start a channel. No-op when the id is already present.
    ///
    /// Initialization runs in the background; if it fails the entry is
    /// removed again and the caller may retry. Returns `true` when a new
    /// session was started.
    pub fn create(&self, channel_id: &str, config: ChannelConfig) -> bool {
        let session = match self.sessions.entry(channel_id.to_string()) {
            Entry::Occupied(_) => {
                debug!(channel_id, "channel already present, create is a no-op");
                return false;
            },
            Entry::Vacant(slot) => {
                let session = ChannelSession::new(channel_id, config.account.clone());
                slot.insert(Arc::clone(&session));
                session
            },
        };

        info!(channel_id, client_id = %config.client_id, "starting channel");
        session.spawn(self.context(), config);

        #[cfg(feature = "metrics")]
        {
            counter!(ch_metrics::STARTED_TOTAL).increment(1);
            gauge!(ch_metrics::ACTIVE).set(self.sessions.len() as f64);
        }
        true
    }

    /// Stored auth challenge, if the channel is awaiting authentication.
    pub fn auth_challenge(&self, channel_id: &str) -> Option<String> {
        self.session(channel_id).and_then(|s| s.challenge())
    }

    pub fn is_ready(&self, channel_id: &str) -> bool {
        self.session(channel_id).is_some_and(|s| s.is_ready())
    }

    pub fn state(&self, channel_id: &str) -> ChannelState {
        self.session(channel_id)
            .map_or(ChannelState::Uninitialized, |s| s.state())
    }

    pub fn snapshot(&self, channel_id: &str) -> Option<ChannelSnapshot> {
        self.session(channel_id).map(|s| s.snapshot())
    }

    /// Subscribe to the transitions of a present channel.
    pub fn subscribe(&self, channel_id: &str) -> Option<watch::Receiver<ChannelSnapshot>> {
        self.session(channel_id).map(|s| s.subscribe())
    }

    /// Send through a channel. `recipient` may be a bare number.
    pub async fn send(&self, channel_id: &str, recipient: &str, body: &str) -> Result<()> {
        if recipient.trim().is_empty() {
            return Err(Error::invalid_input("recipient is empty"));
        }
        let session = self
            .session(channel_id)
            .ok_or_else(|| Error::not_found(channel_id))?;
        session.send(&normalize_recipient(recipient), body).await
    }

    /// Stop a channel and release its client. No-op when absent.
    pub async fn stop(&self, channel_id: &str) {
        let Some(session) = self.session(channel_id) else {
            debug!(channel_id, "stop on absent channel");
            return;
        };
        session.stop().await;
        self.sessions
            .remove_if(channel_id, |_, s| Arc::ptr_eq(s, &session));
        info!(channel_id, "channel stopped");
    }

    /// Stop every channel. Used at shutdown.
    pub async fn stop_all(&self) {
        let ids = self.ids();
        let count = ids.len();
        for channel_id in ids {
            self.stop(&channel_id).await;
        }
        info!(count, "stopped all channels");
    }

    /// Start every given channel. Returns how many new sessions were started.
    pub fn restore<I>(&self, channels: I) -> usize
    where
        I: IntoIterator<Item = (String, ChannelConfig)>,
    {
        let started = channels
            .into_iter()
            .filter(|(channel_id, config)| self.create(channel_id, config.clone()))
            .count();
        info!(started, "restored channels");
        started
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Present channels with their current state, sorted by id.
    pub fn list(&self) -> Vec<(String, ChannelState)> {
        let mut out: Vec<_> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().state()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl ChannelOutbound for ChannelRegistry {
    fn is_ready(&self, channel_id: &str) -> bool {
        ChannelRegistry::is_ready(self, channel_id)
    }

    async fn send(&self, channel_id: &str, recipient: &str, body: &str) -> Result<()> {
        ChannelRegistry::send(self, channel_id, recipient, body).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use {super::*, crate::testing::FakeClientFactory};

    async fn wait_for(registry: &ChannelRegistry, channel_id: &str, state: ChannelState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.state(channel_id) != state {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    fn registry(factory: &FakeClientFactory) -> ChannelRegistry {
        ChannelRegistry::new(Arc::new(factory.clone()))
    }

    #[tokio::test]
    async fn absent_channel_is_uninitialized() {
        let factory = FakeClientFactory::new();
        let registry = registry(&factory);
        assert_eq!(registry.state("nope"), ChannelState::Uninitialized);
        assert!(!registry.is_ready("nope"));
        assert!(registry.auth_challenge("nope").is_none());
        let err = registry.send("nope", "1", "hi").await.unwrap_err();
        assert!(matches!(err, Error::ChannelNotFound { .. }));
    }

    #[tokio::test]
    async fn challenge_then_ready() {
        let factory = FakeClientFactory::new();
        let registry = registry(&factory);
        assert!(registry.create("a", ChannelConfig::new("client-a")));

        let client = factory.wait_for_client("a").await;
        assert_eq!(registry.state("a"), ChannelState::Initializing);

        client.challenge("qr-1").await;
        wait_for(&registry, "a", ChannelState::AwaitingAuth).await;
        assert_eq!(registry.auth_challenge("a").as_deref(), Some("qr-1"));

        client.challenge("qr-2").await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.auth_challenge("a").as_deref() != Some("qr-2") {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let err = registry.send("a", "1", "hi").await.unwrap_err();
        assert!(matches!(err, Error::ChannelNotReady { .. }));

        client.ready(Some("15550001111")).await;
        wait_for(&registry, "a", ChannelState::Ready).await;
        assert!(registry.is_ready("a"));
        assert!(registry.auth_challenge("a").is_none());
        assert_eq!(
            registry.snapshot("a").unwrap().account.as_deref(),
            Some("15550001111")
        );

        registry.send("a", "6281", "hello").await.unwrap();
        assert_eq!(client.sent(), vec![(
            "6281@c.us".to_string(),
            "hello".to_string()
        )]);
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let factory = FakeClientFactory::new().auto_ready();
        let registry = registry(&factory);
        assert!(registry.create("a", ChannelConfig::new("c")));
        wait_for(&registry, "a", ChannelState::Ready).await;
        assert!(!registry.create("a", ChannelConfig::new("other")));
        assert_eq!(factory.start_count("a"), 1);
        assert_eq!(registry.state("a"), ChannelState::Ready);
    }

    #[tokio::test]
    async fn init_failure_leaves_channel_absent_and_retryable() {
        let factory = FakeClientFactory::new().auto_ready();
        factory.fail_next_start("a", "browser crashed");
        let registry = registry(&factory);

        assert!(registry.create("a", ChannelConfig::new("c")));
        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(registry.state("a"), ChannelState::Uninitialized);

        assert!(registry.create("a", ChannelConfig::new("c")));
        wait_for(&registry, "a", ChannelState::Ready).await;
    }

    #[tokio::test]
    async fn disconnect_removes_entry_and_allows_recreate() {
        let factory = FakeClientFactory::new().auto_ready();
        let registry = registry(&factory);
        registry.create("a", ChannelConfig::new("c"));
        wait_for(&registry, "a", ChannelState::Ready).await;

        let first = factory.client("a").unwrap();
        first.disconnect("network lost").await;
        wait_for(&registry, "a", ChannelState::Uninitialized).await;
        assert!(first.is_shut_down());

        assert!(registry.create("a", ChannelConfig::new("c")));
        wait_for(&registry, "a", ChannelState::Ready).await;
        assert_eq!(factory.start_count("a"), 2);
    }

    #[tokio::test]
    async fn recreate_while_send_drains_after_disconnect() {
        let factory = FakeClientFactory::new()
            .auto_ready()
            .send_latency(Duration::from_millis(500));
        let registry = Arc::new(registry(&factory));
        registry.create("a", ChannelConfig::new("c"));
        wait_for(&registry, "a", ChannelState::Ready).await;
        let first = factory.client("a").unwrap();

        let in_flight = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.send("a", "6281", "hi").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(first.max_in_flight(), 1);

        first.disconnect("network lost").await;
        wait_for(&registry, "a", ChannelState::Uninitialized).await;
        assert!(!in_flight.is_finished());
        assert!(!first.is_shut_down());

        assert!(registry.create("a", ChannelConfig::new("c")));
        wait_for(&registry, "a", ChannelState::Ready).await;
        assert_eq!(factory.start_count("a"), 2);

        in_flight.await.unwrap().unwrap();
        assert_eq!(first.sent().len(), 1);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !first.is_shut_down() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn auth_failure_disconnects() {
        let factory = FakeClientFactory::new();
        let registry = registry(&factory);
        registry.create("a", ChannelConfig::new("c"));
        let client = factory.wait_for_client("a").await;
        client.auth_failure("bad session").await;
        wait_for(&registry, "a", ChannelState::Uninitialized).await;
    }

    #[tokio::test]
    async fn stop_releases_client_and_is_noop_when_absent() {
        let factory = FakeClientFactory::new().auto_ready();
        let registry = registry(&factory);
        registry.stop("missing").await;

        registry.create("a", ChannelConfig::new("c"));
        wait_for(&registry, "a", ChannelState::Ready).await;
        let mut rx = registry.subscribe("a").unwrap();
        let client = factory.client("a").unwrap();

        registry.stop("a").await;
        assert!(client.is_shut_down());
        assert_eq!(registry.state("a"), ChannelState::Uninitialized);
        assert_eq!(rx.borrow_and_update().state, ChannelState::Stopped);
    }

    #[tokio::test]
    async fn stop_during_initialization() {
        let factory = FakeClientFactory::new().start_delay(Duration::from_secs(3600));
        let registry = registry(&factory);
        registry.create("a", ChannelConfig::new("c"));
        registry.stop("a").await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn known_account_is_not_rebound() {
        let factory = FakeClientFactory::new();
        let store = Arc::new(crate::testing::MemorySenderStore::default());
        let registry = ChannelRegistry::new(Arc::new(factory.clone()))
            .with_store(Arc::clone(&store) as Arc<dyn SenderStore>);

        registry.create("a", ChannelConfig::new("c"));
        registry.create(
            "b",
            ChannelConfig::new("d").with_account(Some("111".into())),
        );
        factory.wait_for_client("a").await.ready(Some("999")).await;
        factory.wait_for_client("b").await.ready(Some("222")).await;
        wait_for(&registry, "a", ChannelState::Ready).await;
        wait_for(&registry, "b", ChannelState::Ready).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.bound("a").is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(store.bound("a").as_deref(), Some("999"));
        assert!(store.bound("b").is_none());
        assert_eq!(
            registry.snapshot("b").unwrap().account.as_deref(),
            Some("111")
        );
    }

    #[tokio::test]
    async fn sends_are_serialized_per_channel() {
        let factory = FakeClientFactory::new()
            .auto_ready()
            .send_latency(Duration::from_millis(20));
        let registry = Arc::new(registry(&factory));
        registry.create("a", ChannelConfig::new("c"));
        wait_for(&registry, "a", ChannelState::Ready).await;

        let mut tasks = Vec::new();
        for i in 0..5 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.send("a", &format!("{i}"), "x").await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let client = factory.client("a").unwrap();
        assert_eq!(client.sent().len(), 5);
        assert_eq!(client.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn client_failure_maps_to_send_failed() {
        let factory = FakeClientFactory::new().auto_ready();
        let registry = registry(&factory);
        registry.create("a", ChannelConfig::new("c"));
        wait_for(&registry, "a", ChannelState::Ready).await;
        factory.client("a").unwrap().fail_sends_to("13@c.us", "number not on whatsapp");

        let err = registry.send("a", "13", "x").await.unwrap_err();
        assert!(matches!(err, Error::SendFailed { .. }));
        assert!(err.to_string().contains("number not on whatsapp"));
        registry.send("a", "14", "x").await.unwrap();
    }

    #[tokio::test]
    async fn restore_and_stop_all() {
        let factory = FakeClientFactory::new().auto_ready();
        let registry = registry(&factory);
        let started = registry.restore(vec![
            ("a".to_string(), ChannelConfig::new("1")),
            ("b".to_string(), ChannelConfig::new("2")),
            ("a".to_string(), ChannelConfig::new("1")),
        ]);
        assert_eq!(started, 2);
        wait_for(&registry, "a", ChannelState::Ready).await;
        wait_for(&registry, "b", ChannelState::Ready).await;
        assert_eq!(registry.list(), vec![
            ("a".to_string(), ChannelState::Ready),
            ("b".to_string(), ChannelState::Ready)
        ]);

        registry.stop_all().await;
        assert!(registry.is_empty());
        assert!(factory.client("a").unwrap().is_shut_down());
        assert!(factory.client("b").unwrap().is_shut_down());
    }
}
