use {
    anyhow::Result, async_trait::async_trait, herald_channels::SenderStore,
    herald_common::time::now_ms, serde::Serialize, sqlx::SqlitePool,
};

/// An outbound channel owned by a room. `id` doubles as the channel id in
/// the registry, `client_id` as the persisted login identity on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Sender {
    pub id: String,
    pub room_id: String,
    pub client_id: String,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub total_sent: i64,
    pub created_at: i64,
}

impl Sender {
    /// Config used to start this sender's client.
    #[must_use]
    pub fn channel_config(&self) -> herald_channels::ChannelConfig {
        herald_channels::ChannelConfig::new(&self.client_id).with_account(self.phone_number.clone())
    }
}

/// SQLite-backed sender store.
pub struct SqliteSenderStore {
    pool: SqlitePool,
}

impl SqliteSenderStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add an active sender to `room_id` with fresh ids.
    pub async fn create(&self, room_id: &str) -> Result<Sender> {
        let sender = Sender {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            client_id: uuid::Uuid::new_v4().to_string(),
            phone_number: None,
            is_active: true,
            total_sent: 0,
            created_at: now_ms(),
        };
        sqlx::query(
            "INSERT INTO senders (id, room_id, client_id, phone_number, is_active, total_sent, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&sender.id)
        .bind(&sender.room_id)
        .bind(&sender.client_id)
        .bind(&sender.phone_number)
        .bind(sender.is_active)
        .bind(sender.total_sent)
        .bind(sender.created_at)
        .execute(&self.pool)
        .await?;
        Ok(sender)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Sender>> {
        let sender = sqlx::query_as::<_, Sender>("SELECT * FROM senders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sender)
    }

    /// All senders of a room, oldest first.
    pub async fn list_by_room(&self, room_id: &str) -> Result<Vec<Sender>> {
        let senders = sqlx::query_as::<_, Sender>(
            "SELECT * FROM senders WHERE room_id = ? ORDER BY created_at, id",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(senders)
    }

    /// Active senders of a room in the fixed order runs iterate them.
    pub async fn list_active_by_room(&self, room_id: &str) -> Result<Vec<Sender>> {
        let senders = sqlx::query_as::<_, Sender>(
            "SELECT * FROM senders WHERE room_id = ? AND is_active = 1 ORDER BY created_at, id",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(senders)
    }

    /// Every active sender across rooms, for restoring sessions at startup.
    pub async fn list_all_active(&self) -> Result<Vec<Sender>> {
        let senders = sqlx::query_as::<_, Sender>(
            "SELECT * FROM senders WHERE is_active = 1 ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(senders)
    }

    /// Returns `false` when the sender does not exist.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE senders SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM senders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SenderStore for SqliteSenderStore {
    /// Sets the phone number only while none is recorded.
    async fn bind_account(&self, channel_id: &str, account: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE senders SET phone_number = ? WHERE id = ? AND phone_number IS NULL",
        )
        .bind(account)
        .bind(channel_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
