//! In-process fakes for exercising the registry and its callers without a
//! real messaging client.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {async_trait::async_trait, dashmap::DashMap, tokio::sync::mpsc};

use crate::{
    ChannelConfig, ClientEvent, ClientFactory, ClientHandle, Error, MessagingClient, Result,
    SenderStore,
};

/// Factory handing out [`FakeClient`]s. Clones share state.
#[derive(Clone, Default)]
pub struct FakeClientFactory {
    inner: Arc<FactoryInner>,
}

#[derive(Default)]
struct FactoryInner {
    clients: DashMap<String, Arc<FakeClient>>,
    starts: DashMap<String, usize>,
    start_failures: DashMap<String, String>,
    auto_ready: bool,
    start_delay: Option<Duration>,
    send_latency: Option<Duration>,
}

impl FakeClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(self, f: impl FnOnce(&mut FactoryInner)) -> Self {
        let mut inner = Arc::try_unwrap(self.inner).unwrap_or_default();
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Clients report `Ready` (with the configured account) as soon as they start.
    #[must_use]
    pub fn auto_ready(self) -> Self {
        self.configure(|i| i.auto_ready = true)
    }

    #[must_use]
    pub fn start_delay(self, delay: Duration) -> Self {
        self.configure(|i| i.start_delay = Some(delay))
    }

    #[must_use]
    pub fn send_latency(self, latency: Duration) -> Self {
        self.configure(|i| i.send_latency = Some(latency))
    }

    /// Make the next start of `channel_id` fail with `message`.
    pub fn fail_next_start(&self, channel_id: &str, message: &str) {
        self.inner
            .start_failures
            .insert(channel_id.to_string(), message.to_string());
    }

    /// Most recently started client for `channel_id`.
    pub fn client(&self, channel_id: &str) -> Option<Arc<FakeClient>> {
        self.inner
            .clients
            .get(channel_id)
            .map(|c| Arc::clone(c.value()))
    }

    pub async fn wait_for_client(&self, channel_id: &str) -> Arc<FakeClient> {
        loop {
            if let Some(client) = self.client(channel_id) {
                return client;
            }
            tokio::task::yield_now().await;
        }
    }

    pub fn start_count(&self, channel_id: &str) -> usize {
        self.inner.starts.get(channel_id).map_or(0, |c| *c)
    }
}

#[async_trait]
impl ClientFactory for FakeClientFactory {
    async fn start(&self, channel_id: &str, config: &ChannelConfig) -> Result<ClientHandle> {
        if let Some(delay) = self.inner.start_delay {
            tokio::time::sleep(delay).await;
        }
        *self
            .inner
            .starts
            .entry(channel_id.to_string())
            .or_insert(0) += 1;
        if let Some((_, message)) = self.inner.start_failures.remove(channel_id) {
            return Err(Error::init_failed(message));
        }

        let (tx, events) = mpsc::channel(16);
        let client = Arc::new(FakeClient {
            events: tx,
            send_latency: self.inner.send_latency,
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        if self.inner.auto_ready {
            client.ready(config.account.as_deref()).await;
        }
        self.inner
            .clients
            .insert(channel_id.to_string(), Arc::clone(&client));

        Ok(ClientHandle {
            client,
            events,
        })
    }
}

/// Scriptable client: tests push lifecycle events and inspect sends.
pub struct FakeClient {
    events: mpsc::Sender<ClientEvent>,
    send_latency: Option<Duration>,
    sent: Mutex<Vec<(String, String)>>,
    failures: Mutex<HashMap<String, String>>,
    shut_down: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeClient {
    pub async fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event).await;
    }

    pub async fn challenge(&self, payload: &str) {
        self.emit(ClientEvent::Challenge(payload.to_string())).await;
    }

    pub async fn ready(&self, account: Option<&str>) {
        self.emit(ClientEvent::Ready {
            account: account.map(str::to_string),
        })
        .await;
    }

    pub async fn auth_failure(&self, message: &str) {
        self.emit(ClientEvent::AuthFailure(message.to_string()))
            .await;
    }

    pub async fn disconnect(&self, reason: &str) {
        self.emit(ClientEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await;
    }

    /// Every send to the fully-qualified address `to` fails with `message`.
    pub fn fail_sends_to(&self, to: &str, message: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(to.to_string(), message.to_string());
    }

    /// Successful sends, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently running `send` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for FakeClient {
    async fn send(&self, to: &str, text: &str) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.send_latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.is_shut_down() {
            return Err(Error::send_failed("client is shut down"));
        }
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(to)
            .cloned();
        if let Some(message) = failure {
            return Err(Error::send_failed(message));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((to.to_string(), text.to_string()));
        Ok(())
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// [`SenderStore`] that keeps bound accounts in memory.
#[derive(Default)]
pub struct MemorySenderStore {
    accounts: DashMap<String, String>,
}

impl MemorySenderStore {
    pub fn bound(&self, channel_id: &str) -> Option<String> {
        self.accounts.get(channel_id).map(|a| a.value().clone())
    }
}

#[async_trait]
impl SenderStore for MemorySenderStore {
    async fn bind_account(&self, channel_id: &str, account: &str) -> anyhow::Result<bool> {
        if self.accounts.contains_key(channel_id) {
            return Ok(false);
        }
        self.accounts
            .insert(channel_id.to_string(), account.to_string());
        Ok(true)
    }
}
