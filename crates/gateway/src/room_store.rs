use {anyhow::Result, herald_common::time::now_ms, serde::Serialize, sqlx::SqlitePool};

/// A website allowed to start runs, identified by its token and URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub token: String,
    pub website_url: String,
    pub is_active: bool,
    pub created_at: i64,
}

/// SQLite-backed room store.
pub struct SqliteRoomStore {
    pool: SqlitePool,
}

impl SqliteRoomStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an active room with a fresh id and token.
    pub async fn create(&self, name: &str, website_url: &str) -> Result<Room> {
        let room = Room {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            website_url: website_url.to_string(),
            is_active: true,
            created_at: now_ms(),
        };
        sqlx::query(
            "INSERT INTO rooms (id, name, token, website_url, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&room.id)
        .bind(&room.name)
        .bind(&room.token)
        .bind(&room.website_url)
        .bind(room.is_active)
        .bind(room.created_at)
        .execute(&self.pool)
        .await?;
        Ok(room)
    }

    pub async fn list(&self) -> Result<Vec<Room>> {
        let rooms = sqlx::query_as::<_, Room>("SELECT * FROM rooms ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rooms)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Room>> {
        let room = sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(room)
    }

    /// The room a caller's credentials resolve to. Both must match.
    pub async fn find_by_token(&self, token: &str, website_url: &str) -> Result<Option<Room>> {
        let room =
            sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE token = ? AND website_url = ?")
                .bind(token)
                .bind(website_url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(room)
    }

    /// Returns `false` when the room does not exist.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE rooms SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteRoomStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        SqliteRoomStore::new(pool)
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = test_store().await;
        let room = store.create("Shop", "https://shop.example").await.unwrap();
        assert!(room.is_active);
        assert_ne!(room.id, room.token);

        let got = store.get(&room.id).await.unwrap().unwrap();
        assert_eq!(got, room);
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn token_lookup_requires_matching_url() {
        let store = test_store().await;
        let room = store.create("Shop", "https://shop.example").await.unwrap();

        let found = store
            .find_by_token(&room.token, "https://shop.example")
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.id), Some(room.id.clone()));

        assert!(
            store
                .find_by_token(&room.token, "https://other.example")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .find_by_token("bad-token", "https://shop.example")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn set_active_toggles_and_reports_missing() {
        let store = test_store().await;
        let room = store.create("Shop", "https://shop.example").await.unwrap();

        assert!(store.set_active(&room.id, false).await.unwrap());
        assert!(!store.get(&room.id).await.unwrap().unwrap().is_active);
        assert!(!store.set_active("missing", true).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = test_store().await;
        let first = store.create("A", "https://a.example").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create("B", "https://b.example").await.unwrap();

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
