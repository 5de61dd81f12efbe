//! Run-start service: resolves a caller's room, validates the request and
//! hands it to the dispatcher. Runs proceed in the background and are
//! tracked here until they finalize.

use std::{sync::Arc, time::Duration};

use {
    dashmap::DashMap,
    herald_config::DispatchConfig,
    herald_dispatch::{Dispatcher, MessageSource, OutboundMessage, Pacing, RunContext},
    serde::{Deserialize, Serialize},
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, http as http_metrics, labels};

use crate::{
    error::{GatewayError, Result},
    room_store::{Room, SqliteRoomStore},
    sender_store::SqliteSenderStore,
};

/// Routing and pacing fields shared by both request kinds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunTarget {
    pub website_url: String,
    pub room_token: String,
    /// Cycle delay in seconds.
    #[serde(default)]
    pub delay_seconds: Option<f64>,
    /// Burst: items one sender takes per cycle.
    #[serde(default)]
    pub max_sending_times: Option<i64>,
    #[serde(default)]
    pub message_delay_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastRequest {
    #[serde(flatten)]
    pub target: RunTarget,
    #[serde(default)]
    pub receivers: Vec<String>,
    #[serde(default)]
    pub message_body: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomMessage {
    pub number: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomRequest {
    #[serde(flatten)]
    pub target: RunTarget,
    #[serde(default)]
    pub messages: Option<Vec<CustomMessage>>,
}

/// Acknowledgement returned as soon as a run is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStarted {
    pub status: String,
    pub run_id: String,
    pub message: String,
}

pub struct RunService {
    rooms: Arc<SqliteRoomStore>,
    senders: Arc<SqliteSenderStore>,
    dispatcher: Dispatcher,
    defaults: DispatchConfig,
    active: Arc<DashMap<String, CancellationToken>>,
    active_count: Arc<watch::Sender<usize>>,
    shutdown: CancellationToken,
}

impl RunService {
    pub fn new(
        rooms: Arc<SqliteRoomStore>,
        senders: Arc<SqliteSenderStore>,
        dispatcher: Dispatcher,
        defaults: DispatchConfig,
    ) -> Self {
        Self {
            rooms,
            senders,
            dispatcher,
            defaults,
            active: Arc::new(DashMap::new()),
            active_count: Arc::new(watch::Sender::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn start_broadcast(&self, req: BroadcastRequest) -> Result<RunStarted> {
        let result = self.try_start_broadcast(req).await;
        self.observe(&result);
        result
    }

    pub async fn start_custom(&self, req: CustomRequest) -> Result<RunStarted> {
        let result = self.try_start_custom(req).await;
        self.observe(&result);
        result
    }

    async fn try_start_broadcast(&self, req: BroadcastRequest) -> Result<RunStarted> {
        let (room, channels) = self.resolve(&req.target).await?;
        let pacing = self.pacing(&req.target)?;
        let body = req
            .message_body
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| format!("Message from {}", room.name));
        let source = MessageSource::broadcast(body, req.receivers);
        self.launch(&room, channels, source, pacing, "Message sending process started")
            .await
    }

    async fn try_start_custom(&self, req: CustomRequest) -> Result<RunStarted> {
        let (room, channels) = self.resolve(&req.target).await?;
        let messages = req
            .messages
            .filter(|m| !m.is_empty())
            .ok_or_else(|| GatewayError::invalid_input("invalid messages array"))?;
        let pacing = self.pacing(&req.target)?;
        let source = MessageSource::pairs(
            messages
                .into_iter()
                .map(|m| OutboundMessage::new(m.number, m.message))
                .collect(),
        );
        self.launch(
            &room,
            channels,
            source,
            pacing,
            "Custom message sending process started",
        )
        .await
    }

    /// Room and active sender ids for the caller's credentials.
    async fn resolve(&self, target: &RunTarget) -> Result<(Room, Vec<String>)> {
        let room = self
            .rooms
            .find_by_token(&target.room_token, &target.website_url)
            .await?
            .ok_or(GatewayError::Unauthorized)?;
        if !room.is_active {
            return Err(GatewayError::RoomInactive);
        }
        let channels: Vec<String> = self
            .senders
            .list_active_by_room(&room.id)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        if channels.is_empty() {
            return Err(GatewayError::NoActiveSenders);
        }
        Ok((room, channels))
    }

    fn pacing(&self, target: &RunTarget) -> Result<Pacing> {
        let burst = target
            .max_sending_times
            .ok_or_else(|| GatewayError::invalid_input("max_sending_times is required"))?;
        let pacing = Pacing::from_request(
            target
                .message_delay_seconds
                .unwrap_or(self.defaults.message_delay_secs),
            target
                .delay_seconds
                .unwrap_or(self.defaults.default_cycle_delay_secs),
            burst,
        )?;
        Ok(pacing.with_max_idle_cycles(self.defaults.max_idle_cycles))
    }

    async fn launch(
        &self,
        room: &Room,
        channels: Vec<String>,
        source: MessageSource,
        pacing: Pacing,
        message: &str,
    ) -> Result<RunStarted> {
        let ctx = RunContext::new(&room.id);
        let run_id = ctx.run_id.clone();
        let cancel = self.shutdown.child_token();

        self.active.insert(run_id.clone(), cancel.clone());
        self.active_count.send_replace(self.active.len());

        let handle = match self
            .dispatcher
            .start_with_token(ctx, channels, source, pacing, cancel)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.forget(&run_id);
                return Err(e.into());
            },
        };

        let active = Arc::clone(&self.active);
        let active_count = Arc::clone(&self.active_count);
        tokio::spawn(async move {
            let run_id = handle.run_id().to_string();
            if let Err(e) = handle.wait().await {
                warn!(run_id, error = %e, "run task ended abnormally");
            }
            active.remove(&run_id);
            active_count.send_replace(active.len());
        });

        Ok(RunStarted {
            status: "started".into(),
            run_id,
            message: message.to_string(),
        })
    }

    fn forget(&self, run_id: &str) {
        self.active.remove(run_id);
        self.active_count.send_replace(self.active.len());
    }

    fn observe(&self, result: &Result<RunStarted>) {
        match result {
            Ok(started) => info!(run_id = %started.run_id, "run accepted"),
            Err(e) => {
                info!(error = %e, kind = e.kind(), "run rejected");
                #[cfg(feature = "metrics")]
                counter!(http_metrics::RUN_REJECTIONS_TOTAL, labels::ERROR_TYPE => e.kind())
                    .increment(1);
            },
        }
    }

    /// Whether `run_id` is still executing in this process.
    pub fn is_active(&self, run_id: &str) -> bool {
        self.active.contains_key(run_id)
    }

    pub fn active_runs(&self) -> usize {
        self.active.len()
    }

    /// Signal cancellation. Returns `false` when the run is not executing.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        match self.active.get(run_id) {
            Some(entry) => {
                entry.value().cancel();
                info!(run_id, "run cancellation requested");
                true
            },
            None => false,
        }
    }

    /// Cancel every run and wait up to `grace` for them to finalize.
    /// Returns `true` when all runs finalized in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        let pending = self.active.len();
        if pending == 0 {
            return true;
        }
        info!(pending, grace_secs = grace.as_secs(), "waiting for runs to finalize");

        let mut count = self.active_count.subscribe();
        let drained = tokio::time::timeout(grace, count.wait_for(|n| *n == 0)).await;
        match drained {
            Ok(Ok(_)) => true,
            _ => {
                warn!(remaining = self.active.len(), "runs still active after grace period");
                false
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::run_store::SqliteRunLog,
        herald_channels::{ChannelRegistry, testing::FakeClientFactory},
        sqlx::SqlitePool,
    };

    struct Fixture {
        service: RunService,
        rooms: Arc<SqliteRoomStore>,
        senders: Arc<SqliteSenderStore>,
        log: Arc<SqliteRunLog>,
        registry: Arc<ChannelRegistry>,
        factory: FakeClientFactory,
    }

    async fn fixture() -> Fixture {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let rooms = Arc::new(SqliteRoomStore::new(pool.clone()));
        let senders = Arc::new(SqliteSenderStore::new(pool.clone()));
        let log = Arc::new(SqliteRunLog::new(pool));
        let factory = FakeClientFactory::new().auto_ready();
        let registry = Arc::new(ChannelRegistry::new(Arc::new(factory.clone())));
        let dispatcher = Dispatcher::new(registry.clone(), log.clone());
        let defaults = DispatchConfig {
            message_delay_secs: 0.0,
            ..DispatchConfig::default()
        };
        Fixture {
            service: RunService::new(rooms.clone(), senders.clone(), dispatcher, defaults),
            rooms,
            senders,
            log,
            registry,
            factory,
        }
    }

    fn target(room: &Room, burst: Option<i64>) -> RunTarget {
        RunTarget {
            website_url: room.website_url.clone(),
            room_token: room.token.clone(),
            delay_seconds: Some(0.0),
            max_sending_times: burst,
            message_delay_seconds: None,
        }
    }

    async fn wait_finished(f: &Fixture, run_id: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.service.is_active(run_id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn ready_sender(f: &Fixture, room: &Room) -> String {
        let sender = f.senders.create(&room.id).await.unwrap();
        f.registry.create(&sender.id, sender.channel_config());
        tokio::time::timeout(Duration::from_secs(5), async {
            while !f.registry.is_ready(&sender.id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        sender.id
    }

    #[tokio::test]
    async fn validation_order() {
        let f = fixture().await;
        let room = f.rooms.create("Shop", "https://shop.example").await.unwrap();

        let mut bad = target(&room, Some(0));
        bad.room_token = "wrong".into();
        let err = f
            .service
            .start_broadcast(BroadcastRequest {
                target: bad,
                ..BroadcastRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized));

        // No senders yet, and the burst is invalid: the sender check wins.
        let err = f
            .service
            .start_broadcast(BroadcastRequest {
                target: target(&room, Some(0)),
                ..BroadcastRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoActiveSenders));

        f.senders.create(&room.id).await.unwrap();
        let err = f
            .service
            .start_broadcast(BroadcastRequest {
                target: target(&room, Some(0)),
                ..BroadcastRequest::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");

        f.rooms.set_active(&room.id, false).await.unwrap();
        let err = f
            .service
            .start_broadcast(BroadcastRequest {
                target: target(&room, Some(1)),
                ..BroadcastRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RoomInactive));
    }

    #[tokio::test]
    async fn custom_requires_messages() {
        let f = fixture().await;
        let room = f.rooms.create("Shop", "https://shop.example").await.unwrap();
        f.senders.create(&room.id).await.unwrap();

        for messages in [None, Some(vec![])] {
            let err = f
                .service
                .start_custom(CustomRequest {
                    target: target(&room, Some(1)),
                    messages,
                })
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::InvalidInput { .. }));
        }
    }

    #[tokio::test]
    async fn missing_burst_is_invalid_input() {
        let f = fixture().await;
        let room = f.rooms.create("Shop", "https://shop.example").await.unwrap();
        f.senders.create(&room.id).await.unwrap();

        let err = f
            .service
            .start_broadcast(BroadcastRequest {
                target: target(&room, None),
                receivers: vec!["6281".into()],
                ..BroadcastRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn broadcast_uses_room_name_by_default() {
        let f = fixture().await;
        let room = f.rooms.create("Shop", "https://shop.example").await.unwrap();
        let sender_id = ready_sender(&f, &room).await;

        let started = f
            .service
            .start_broadcast(BroadcastRequest {
                target: target(&room, Some(5)),
                receivers: vec!["6281".into(), "+6282".into()],
                message_body: None,
            })
            .await
            .unwrap();
        assert_eq!(started.status, "started");
        wait_finished(&f, &started.run_id).await;

        let client = f.factory.client(&sender_id).unwrap();
        assert_eq!(client.sent(), vec![
            ("6281@c.us".to_string(), "Message from Shop".to_string()),
            ("6282@c.us".to_string(), "Message from Shop".to_string()),
        ]);

        let run = f.log.get_run(&started.run_id).await.unwrap().unwrap();
        assert_eq!(run.outcome, "completed");
        assert_eq!(run.total_sent, 2);
        let sender = f.senders.get(&sender_id).await.unwrap().unwrap();
        assert_eq!(sender.total_sent, 2);
    }

    #[tokio::test]
    async fn custom_failure_is_recorded_and_run_continues() {
        let f = fixture().await;
        let room = f.rooms.create("Shop", "https://shop.example").await.unwrap();
        let sender_id = ready_sender(&f, &room).await;
        f.factory
            .client(&sender_id)
            .unwrap()
            .fail_sends_to("6282@c.us", "not on whatsapp");

        let started = f
            .service
            .start_custom(CustomRequest {
                target: target(&room, Some(1)),
                messages: Some(vec![
                    CustomMessage {
                        number: "6281".into(),
                        message: "a".into(),
                    },
                    CustomMessage {
                        number: "6282".into(),
                        message: "b".into(),
                    },
                    CustomMessage {
                        number: "6283".into(),
                        message: "c".into(),
                    },
                ]),
            })
            .await
            .unwrap();
        wait_finished(&f, &started.run_id).await;

        let attempts = f.log.run_attempts(&started.run_id).await.unwrap();
        let statuses: Vec<_> = attempts.iter().map(|a| a.status.as_str()).collect();
        assert_eq!(statuses, vec!["success", "failed", "success"]);
        assert!(
            attempts[1]
                .error_message
                .as_deref()
                .unwrap()
                .contains("not on whatsapp")
        );
        let run = f.log.get_run(&started.run_id).await.unwrap().unwrap();
        assert_eq!(run.total_sent, 2);
    }

    #[tokio::test]
    async fn cancel_and_shutdown_finalize_runs() {
        let f = fixture().await;
        let room = f.rooms.create("Shop", "https://shop.example").await.unwrap();
        // Never ready: the run idles until cancelled.
        f.senders.create(&room.id).await.unwrap();

        let req = || BroadcastRequest {
            target: target(&room, Some(1)),
            receivers: vec!["6281".into()],
            message_body: Some("hi".into()),
        };
        let first = f.service.start_broadcast(req()).await.unwrap();
        let second = f.service.start_broadcast(req()).await.unwrap();
        assert_eq!(f.service.active_runs(), 2);

        assert!(f.service.cancel_run(&first.run_id));
        wait_finished(&f, &first.run_id).await;
        assert!(!f.service.cancel_run(&first.run_id));
        let run = f.log.get_run(&first.run_id).await.unwrap().unwrap();
        assert_eq!(run.outcome, "cancelled");
        assert!(run.end_time.is_some());

        assert!(f.service.shutdown(Duration::from_secs(5)).await);
        let run = f.log.get_run(&second.run_id).await.unwrap().unwrap();
        assert_eq!(run.outcome, "cancelled");
        assert_eq!(f.service.active_runs(), 0);
    }
}
