//! Run and delivery-attempt persistence (`process_log` / `message_log`).

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    herald_dispatch::{DeliveryAttempt, RunFinish, RunLog, RunStart},
    serde::Serialize,
    sqlx::SqlitePool,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct RunRecord {
    pub id: String,
    pub room_id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub total_sent: i64,
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AttemptRecord {
    pub id: i64,
    pub run_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub receiver_number: String,
    pub status: String,
    pub error_message: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttemptStats {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
}

/// Filter over a room's attempts. Bounds are inclusive, in epoch millis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptQuery {
    pub room_id: String,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub sender_id: Option<String>,
}

impl AttemptQuery {
    pub fn room(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ..Self::default()
        }
    }
}

const ATTEMPT_FILTER: &str = "room_id = ?1
    AND (?2 IS NULL OR timestamp >= ?2)
    AND (?3 IS NULL OR timestamp <= ?3)
    AND (?4 IS NULL OR sender_id = ?4)";

/// SQLite-backed [`RunLog`] plus the read side used by the HTTP API.
pub struct SqliteRunLog {
    pool: SqlitePool,
}

impl SqliteRunLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let run = sqlx::query_as::<_, RunRecord>("SELECT * FROM process_log WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    /// Runs of a room, newest first.
    pub async fn list_runs(&self, room_id: &str, limit: u32) -> Result<Vec<RunRecord>> {
        let runs = sqlx::query_as::<_, RunRecord>(
            "SELECT * FROM process_log WHERE room_id = ? ORDER BY start_time DESC, id LIMIT ?",
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    /// Attempts matching `query`, newest first.
    pub async fn query_attempts(&self, query: &AttemptQuery) -> Result<Vec<AttemptRecord>> {
        let sql = format!(
            "SELECT * FROM message_log WHERE {ATTEMPT_FILTER} ORDER BY timestamp DESC, id DESC"
        );
        let attempts = sqlx::query_as::<_, AttemptRecord>(&sql)
            .bind(&query.room_id)
            .bind(query.from_ms)
            .bind(query.to_ms)
            .bind(&query.sender_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(attempts)
    }

    pub async fn attempt_stats(&self, query: &AttemptQuery) -> Result<AttemptStats> {
        let sql = format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'success'), 0),
                    COALESCE(SUM(status = 'failed'), 0)
             FROM message_log WHERE {ATTEMPT_FILTER}"
        );
        let (total, success, failed) = sqlx::query_as::<_, (i64, i64, i64)>(&sql)
            .bind(&query.room_id)
            .bind(query.from_ms)
            .bind(query.to_ms)
            .bind(&query.sender_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(AttemptStats {
            total,
            success,
            failed,
        })
    }

    /// Attempts of one run in recording order.
    pub async fn run_attempts(&self, run_id: &str) -> Result<Vec<AttemptRecord>> {
        let attempts =
            sqlx::query_as::<_, AttemptRecord>("SELECT * FROM message_log WHERE run_id = ? ORDER BY id")
                .bind(run_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(attempts)
    }
}

#[async_trait]
impl RunLog for SqliteRunLog {
    async fn start_run(&self, run: &RunStart) -> Result<()> {
        sqlx::query(
            "INSERT INTO process_log (id, room_id, start_time, end_time, total_sent, outcome)
             VALUES (?, ?, ?, NULL, 0, 'running')",
        )
        .bind(&run.run_id)
        .bind(&run.room_id)
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        sqlx::query(
            "INSERT INTO message_log
             (run_id, room_id, sender_id, receiver_number, status, error_message, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&attempt.run_id)
        .bind(&attempt.room_id)
        .bind(&attempt.channel_id)
        .bind(&attempt.recipient)
        .bind(attempt.status.as_str())
        .bind(&attempt.error)
        .bind(attempt.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_sent(&self, channel_id: &str) -> Result<()> {
        sqlx::query("UPDATE senders SET total_sent = total_sent + 1 WHERE id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_run(&self, finish: &RunFinish) -> Result<()> {
        let total_sent = i64::try_from(finish.total_sent)?;
        let result = sqlx::query(
            "UPDATE process_log SET end_time = ?, total_sent = ?, outcome = ?
             WHERE id = ? AND end_time IS NULL",
        )
        .bind(finish.ended_at)
        .bind(total_sent)
        .bind(finish.outcome.as_str())
        .bind(&finish.run_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("run {} is unknown or already finalized", finish.run_id);
        }
        Ok(())
    }
}
