//! Herald gateway: SQLite persistence for rooms, senders, runs and delivery
//! attempts, the run-start service, and the axum HTTP API.
//!
//! Lifecycle: open the database, build a [`GatewayState`] around a channel
//! registry, restore active senders, serve, then on shutdown cancel runs
//! and stop every channel.

pub mod error;
pub mod room_store;
pub mod routes;
pub mod run_service;
pub mod run_store;
pub mod sender_service;
pub mod sender_store;
pub mod server;
pub mod state;

pub use {
    error::{GatewayError, Result},
    room_store::{Room, SqliteRoomStore},
    run_service::{BroadcastRequest, CustomMessage, CustomRequest, RunService, RunStarted},
    run_store::{AttemptQuery, AttemptRecord, AttemptStats, RunRecord, SqliteRunLog},
    sender_service::{SenderService, SenderStatus},
    sender_store::{Sender, SqliteSenderStore},
    server::{build_gateway_app, open_database, start_gateway},
    state::GatewayState,
};

/// Create or upgrade the `rooms`, `senders`, `process_log` and
/// `message_log` tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
