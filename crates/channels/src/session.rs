//! Channel session state machine.
//!
//! Each session runs one background task that starts the client, consumes
//! its [`ClientEvent`]s and is the only writer of the session's
//! [`ChannelSnapshot`]. Readers go through the watch channel. Sends share a
//! mutex with the client slot, so a channel never has more than one send in
//! flight and the client is never shut down under a running send.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use {
    dashmap::DashMap,
    tokio::{
        sync::{Mutex, watch},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{channels as ch_metrics, counter, gauge};

use crate::{
    ChannelConfig, ClientEvent, ClientFactory, ClientHandle, Error, MessagingClient, Result,
    SenderStore,
    state::{ChannelSnapshot, ChannelState},
};

pub(crate) type SessionMap = Arc<DashMap<String, Arc<ChannelSession>>>;

/// Collaborators a session task needs.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub factory: Arc<dyn ClientFactory>,
    pub store: Option<Arc<dyn SenderStore>>,
    pub sessions: SessionMap,
}

pub struct ChannelSession {
    channel_id: String,
    state_tx: watch::Sender<ChannelSnapshot>,
    client: Mutex<Option<Arc<dyn MessagingClient>>>,
    cancel: CancellationToken,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl ChannelSession {
    pub(crate) fn new(channel_id: &str, account: Option<String>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ChannelSnapshot::initializing(account));
        Arc::new(Self {
            channel_id: channel_id.to_string(),
            state_tx,
            client: Mutex::new(None),
            cancel: CancellationToken::new(),
            task: StdMutex::new(None),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.state_tx.borrow().clone()
    }

    pub fn state(&self) -> ChannelState {
        self.state_tx.borrow().state
    }

    pub fn is_ready(&self) -> bool {
        self.state_tx.borrow().is_ready()
    }

    pub fn challenge(&self) -> Option<String> {
        self.state_tx.borrow().challenge.clone()
    }

    /// Watch every state transition of this session.
    pub fn subscribe(&self) -> watch::Receiver<ChannelSnapshot> {
        self.state_tx.subscribe()
    }

    pub(crate) async fn send(&self, to: &str, text: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::not_ready(&self.channel_id));
        }
        let slot = self.client.lock().await;
        // Readiness may have changed while queued behind another send.
        if !self.is_ready() {
            return Err(Error::not_ready(&self.channel_id));
        }
        let Some(client) = slot.as_ref() else {
            return Err(Error::not_ready(&self.channel_id));
        };
        client.send(to, text).await.map_err(|e| match e {
            Error::SendFailed { .. } => e,
            other => Error::send_failed(other),
        })
    }

    /// Spawn the session task. Called once, right after insertion.
    pub(crate) fn spawn(self: &Arc<Self>, ctx: SessionContext, config: ChannelConfig) {
        let handle = tokio::spawn(Arc::clone(self).drive(ctx, config));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Cancel the session and wait until its client has been released.
    pub(crate) async fn stop(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(channel_id = %self.channel_id, error = %e, "channel session task failed");
        }
    }

    fn publish(&self, update: impl FnOnce(&mut ChannelSnapshot)) {
        self.state_tx.send_modify(update);
    }

    async fn drive(self: Arc<Self>, ctx: SessionContext, config: ChannelConfig) {
        let channel_id = self.channel_id.clone();

        let started = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                info!(channel_id, "channel stopped during initialization");
                self.finish(ChannelState::Stopped, &ctx).await;
                return;
            },
            started = ctx.factory.start(&channel_id, &config) => started,
        };

        let ClientHandle { client, mut events } = match started {
            Ok(handle) => handle,
            Err(e) => {
                warn!(channel_id, error = %e, "channel initialization failed");
                #[cfg(feature = "metrics")]
                counter!(ch_metrics::INIT_FAILURES_TOTAL).increment(1);
                self.finish(ChannelState::Disconnected, &ctx).await;
                return;
            },
        };
        *self.client.lock().await = Some(client);
        debug!(channel_id, "channel client started");

        let exit = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break ChannelState::Stopped,
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!(channel_id, "client event stream closed");
                        break ChannelState::Disconnected;
                    };
                    if let Some(terminal) = self.apply(event, &ctx).await {
                        break terminal;
                    }
                },
            }
        };

        self.finish(exit, &ctx).await;
    }

    /// Apply one client event. Returns the terminal state when the event
    /// ends the session.
    async fn apply(&self, event: ClientEvent, ctx: &SessionContext) -> Option<ChannelState> {
        let channel_id = self.channel_id.as_str();
        match event {
            ClientEvent::Challenge(challenge) => {
                info!(channel_id, "auth challenge received");
                self.publish(|s| {
                    s.state = ChannelState::AwaitingAuth;
                    s.challenge = Some(challenge);
                });
                None
            },
            ClientEvent::Authenticated => {
                info!(channel_id, "channel authenticated");
                None
            },
            ClientEvent::AuthFailure(message) => {
                warn!(channel_id, error = %message, "channel auth failure");
                Some(ChannelState::Disconnected)
            },
            ClientEvent::Ready { account } => {
                let to_bind = match (self.state_tx.borrow().account.as_ref(), account) {
                    (None, Some(account)) => Some(account),
                    _ => None,
                };
                self.publish(|s| {
                    s.state = ChannelState::Ready;
                    s.challenge = None;
                    if s.account.is_none() {
                        s.account.clone_from(&to_bind);
                    }
                });
                info!(channel_id, account = ?self.state_tx.borrow().account, "channel ready");
                #[cfg(feature = "metrics")]
                counter!(ch_metrics::READY_TOTAL).increment(1);

                if let (Some(account), Some(store)) = (to_bind, ctx.store.as_ref()) {
                    match store.bind_account(channel_id, &account).await {
                        Ok(true) => info!(channel_id, account, "bound account to channel"),
                        Ok(false) => debug!(channel_id, "channel account already bound"),
                        Err(e) => warn!(channel_id, error = %e, "failed to persist channel account"),
                    }
                }
                None
            },
            ClientEvent::Disconnected { reason } => {
                warn!(channel_id, reason, "channel disconnected");
                Some(ChannelState::Disconnected)
            },
        }
    }

    /// Publish the terminal state, drop the registry entry if it still
    /// points at this session, then release the client. The entry goes
    /// first so a `create` issued while a send drains starts a fresh session.
    async fn finish(&self, terminal: ChannelState, ctx: &SessionContext) {
        self.publish(|s| {
            s.state = terminal;
            s.challenge = None;
        });

        ctx.sessions
            .remove_if(&self.channel_id, |_, s| std::ptr::eq(s.as_ref(), self));

        let client = self.client.lock().await.take();
        if let Some(client) = client {
            client.shutdown().await;
        }

        #[cfg(feature = "metrics")]
        {
            if terminal == ChannelState::Disconnected {
                counter!(ch_metrics::DISCONNECTED_TOTAL).increment(1);
            }
            gauge!(ch_metrics::ACTIVE).set(ctx.sessions.len() as f64);
        }
        debug!(channel_id = %self.channel_id, state = %terminal, "channel session ended");
    }
}
