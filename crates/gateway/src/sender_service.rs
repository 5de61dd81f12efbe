//! Sender lifecycle: keeps the `senders` table and the channel registry in
//! step.

use std::sync::Arc;

use {
    herald_channels::{ChannelRegistry, ChannelState},
    serde::Serialize,
    tracing::{info, warn},
};

use crate::{
    error::{GatewayError, Result},
    room_store::SqliteRoomStore,
    sender_store::{Sender, SqliteSenderStore},
};

/// Live view of a sender for the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderStatus {
    pub id: String,
    pub is_active: bool,
    pub state: ChannelState,
    pub ready: bool,
    /// Pending QR payload while the channel awaits authentication.
    pub challenge: Option<String>,
    pub phone_number: Option<String>,
    pub total_sent: i64,
}

pub struct SenderService {
    rooms: Arc<SqliteRoomStore>,
    senders: Arc<SqliteSenderStore>,
    registry: Arc<ChannelRegistry>,
}

impl SenderService {
    pub fn new(
        rooms: Arc<SqliteRoomStore>,
        senders: Arc<SqliteSenderStore>,
        registry: Arc<ChannelRegistry>,
    ) -> Self {
        Self {
            rooms,
            senders,
            registry,
        }
    }

    async fn require(&self, id: &str) -> Result<Sender> {
        self.senders
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::not_found("sender", id))
    }

    /// Create a sender in `room_id` and start its channel.
    pub async fn add(&self, room_id: &str) -> Result<Sender> {
        if self.rooms.get(room_id).await?.is_none() {
            return Err(GatewayError::not_found("room", room_id));
        }
        let sender = self.senders.create(room_id).await?;
        self.registry.create(&sender.id, sender.channel_config());
        info!(sender_id = %sender.id, room_id, "sender added");
        Ok(sender)
    }

    /// Flip `is_active`. Activating starts the channel, deactivating stops it.
    pub async fn toggle(&self, id: &str) -> Result<Sender> {
        let mut sender = self.require(id).await?;
        sender.is_active = !sender.is_active;
        self.senders.set_active(id, sender.is_active).await?;

        if sender.is_active {
            self.registry.create(id, sender.channel_config());
        } else {
            self.registry.stop(id).await;
        }
        info!(sender_id = id, active = sender.is_active, "sender toggled");
        Ok(sender)
    }

    /// Stop the channel, then delete the record.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.require(id).await?;
        self.registry.stop(id).await;
        self.senders.delete(id).await?;
        info!(sender_id = id, "sender deleted");
        Ok(())
    }

    pub async fn status(&self, id: &str) -> Result<SenderStatus> {
        let sender = self.require(id).await?;
        let snapshot = self.registry.snapshot(id);
        let (state, ready, challenge, account) = match snapshot {
            Some(s) => (s.state, s.is_ready(), s.challenge, s.account),
            None => (ChannelState::Uninitialized, false, None, None),
        };
        Ok(SenderStatus {
            id: sender.id,
            is_active: sender.is_active,
            state,
            ready,
            challenge,
            // The session publishes Ready before the binding is persisted.
            phone_number: sender.phone_number.or(account),
            total_sent: sender.total_sent,
        })
    }

    /// Start a channel for every active sender. Returns how many started.
    pub async fn restore(&self) -> Result<usize> {
        let active = self.senders.list_all_active().await?;
        Ok(self
            .registry
            .restore(active.iter().map(|s| (s.id.clone(), s.channel_config()))))
    }

    pub async fn stop_all(&self) {
        if self.registry.is_empty() {
            return;
        }
        self.registry.stop_all().await;
        if !self.registry.is_empty() {
            warn!(remaining = self.registry.len(), "channels still present after stop");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        herald_channels::testing::FakeClientFactory,
        sqlx::SqlitePool,
        std::time::Duration,
    };

    struct Fixture {
        service: SenderService,
        rooms: Arc<SqliteRoomStore>,
        senders: Arc<SqliteSenderStore>,
        registry: Arc<ChannelRegistry>,
        factory: FakeClientFactory,
    }

    async fn fixture() -> Fixture {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let rooms = Arc::new(SqliteRoomStore::new(pool.clone()));
        let senders = Arc::new(SqliteSenderStore::new(pool));
        let factory = FakeClientFactory::new();
        let registry = Arc::new(
            ChannelRegistry::new(Arc::new(factory.clone())).with_store(senders.clone()),
        );
        Fixture {
            service: SenderService::new(rooms.clone(), senders.clone(), registry.clone()),
            rooms,
            senders,
            registry,
            factory,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn add_starts_channel_and_status_reports_challenge() {
        let f = fixture().await;
        let room = f.rooms.create("Shop", "https://shop.example").await.unwrap();
        let sender = f.service.add(&room.id).await.unwrap();
        assert!(!f.registry.is_empty());

        let client = f.factory.wait_for_client(&sender.id).await;
        client.challenge("2@qr").await;
        eventually(|| f.registry.state(&sender.id) == ChannelState::AwaitingAuth).await;

        let status = f.service.status(&sender.id).await.unwrap();
        assert_eq!(status.challenge.as_deref(), Some("2@qr"));
        assert!(!status.ready);

        client.ready(Some("62811")).await;
        eventually(|| f.registry.is_ready(&sender.id)).await;
        let status = f.service.status(&sender.id).await.unwrap();
        assert!(status.ready);
        assert_eq!(status.challenge, None);
        assert_eq!(status.phone_number.as_deref(), Some("62811"));
    }

    #[tokio::test]
    async fn add_to_missing_room_is_not_found() {
        let f = fixture().await;
        let err = f.service.add("nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { what: "room", .. }));
    }

    #[tokio::test]
    async fn toggle_stops_and_restarts() {
        let f = fixture().await;
        let room = f.rooms.create("Shop", "https://shop.example").await.unwrap();
        let sender = f.service.add(&room.id).await.unwrap();
        f.factory.wait_for_client(&sender.id).await;

        let off = f.service.toggle(&sender.id).await.unwrap();
        assert!(!off.is_active);
        assert_eq!(f.registry.state(&sender.id), ChannelState::Uninitialized);
        assert!(!f.senders.get(&sender.id).await.unwrap().unwrap().is_active);

        let on = f.service.toggle(&sender.id).await.unwrap();
        assert!(on.is_active);
        eventually(|| f.factory.start_count(&sender.id) == 2).await;
    }

    #[tokio::test]
    async fn delete_stops_channel_and_removes_record() {
        let f = fixture().await;
        let room = f.rooms.create("Shop", "https://shop.example").await.unwrap();
        let sender = f.service.add(&room.id).await.unwrap();
        let client = f.factory.wait_for_client(&sender.id).await;

        f.service.delete(&sender.id).await.unwrap();
        assert!(client.is_shut_down());
        assert!(f.senders.get(&sender.id).await.unwrap().is_none());
        assert!(matches!(
            f.service.delete(&sender.id).await.unwrap_err(),
            GatewayError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn restore_starts_only_active_senders() {
        let f = fixture().await;
        let room = f.rooms.create("Shop", "https://shop.example").await.unwrap();
        let a = f.senders.create(&room.id).await.unwrap();
        let b = f.senders.create(&room.id).await.unwrap();
        f.senders.set_active(&b.id, false).await.unwrap();

        assert_eq!(f.service.restore().await.unwrap(), 1);
        assert_eq!(f.registry.ids(), vec![a.id.clone()]);

        f.service.stop_all().await;
        assert!(f.registry.is_empty());
    }
}
