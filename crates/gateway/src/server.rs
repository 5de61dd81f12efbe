use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::Context,
    axum::{
        Router,
        routing::{delete, get, post},
    },
    herald_config::HeraldConfig,
    herald_whatsapp::WhatsAppClientFactory,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode},
    },
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::{routes, state::GatewayState};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/rooms", get(routes::list_rooms).post(routes::create_room))
        .route("/rooms/{id}", get(routes::get_room))
        .route(
            "/rooms/{id}/senders",
            get(routes::list_room_senders).post(routes::add_sender),
        )
        .route("/rooms/{id}/analytics", get(routes::room_analytics))
        .route("/rooms/{id}/runs", get(routes::list_room_runs))
        .route("/senders/{id}", delete(routes::delete_sender))
        .route("/senders/{id}/status", get(routes::sender_status))
        .route("/senders/{id}/toggle", post(routes::toggle_sender))
        .route("/send-messages", post(routes::send_messages))
        .route("/send-custom-messages", post(routes::send_custom_messages))
        .route("/runs/{id}", get(routes::get_run))
        .route("/runs/{id}/cancel", post(routes::cancel_run))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { gateway: state })
}

/// Open (creating if needed) the SQLite database and apply migrations.
pub async fn open_database(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePool::connect_with(options)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    crate::run_migrations(&pool).await?;
    Ok(pool)
}

/// Database location: the configured path, else `<data_dir>/herald.db`.
pub fn database_path(config: &HeraldConfig, data_dir: Option<PathBuf>) -> PathBuf {
    config.database.path.clone().unwrap_or_else(|| {
        data_dir
            .unwrap_or_else(herald_config::data_dir)
            .join("herald.db")
    })
}

/// Run the gateway until interrupted, then cancel runs (bounded by the
/// shutdown grace) and stop every channel.
pub async fn start_gateway(
    config: HeraldConfig,
    bind: &str,
    port: u16,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let db_path = database_path(&config, data_dir);
    let pool = open_database(&db_path).await?;
    info!(path = %db_path.display(), "database ready");

    let factory = Arc::new(WhatsAppClientFactory::new(config.sidecar.clone()));
    let state = GatewayState::new(pool, factory.clone(), config.dispatch.clone());

    #[cfg(feature = "metrics")]
    let state = {
        let recorder = herald_metrics::MetricsRecorderConfig {
            enabled: config.metrics.enabled,
            global_labels: vec![("service".into(), "herald".into())],
        };
        match herald_metrics::init_metrics(recorder) {
            Ok(handle) => state.with_metrics_handle(handle),
            Err(e) => {
                warn!(error = %e, "failed to initialize metrics");
                state
            },
        }
    };

    let state = Arc::new(state);
    match state.sender_service.restore().await {
        Ok(started) => info!(started, "restored active senders"),
        Err(e) => warn!(error = %e, "failed to restore senders"),
    }

    let listener = tokio::net::TcpListener::bind((bind, port))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    let addr = listener.local_addr()?;
    info!(%addr, version = %state.version, "herald gateway listening");

    let app = build_gateway_app(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    if !state.runs.shutdown(config.dispatch.shutdown_grace()).await {
        warn!("some runs did not finalize before the grace period ended");
    }
    state.sender_service.stop_all().await;
    factory.close().await;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_database_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("herald.db");
        let pool = open_database(&path).await.unwrap();
        assert!(path.exists());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rooms")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn configured_database_path_wins() {
        let mut config = HeraldConfig::default();
        assert_eq!(
            database_path(&config, Some(PathBuf::from("/data"))),
            PathBuf::from("/data/herald.db")
        );
        config.database.path = Some(PathBuf::from("/srv/h.db"));
        assert_eq!(
            database_path(&config, Some(PathBuf::from("/data"))),
            PathBuf::from("/srv/h.db")
        );
    }
}
