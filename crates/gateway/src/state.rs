use std::sync::Arc;

use {
    herald_channels::{ChannelRegistry, ClientFactory},
    herald_config::DispatchConfig,
    herald_dispatch::Dispatcher,
    sqlx::SqlitePool,
};

use crate::{
    room_store::SqliteRoomStore, run_service::RunService, run_store::SqliteRunLog,
    sender_service::SenderService, sender_store::SqliteSenderStore,
};

/// Everything the HTTP handlers and the server lifecycle share. Owns the
/// channel registry; the dispatcher and services borrow it through `Arc`.
pub struct GatewayState {
    pub version: String,
    pub rooms: Arc<SqliteRoomStore>,
    pub senders: Arc<SqliteSenderStore>,
    pub run_log: Arc<SqliteRunLog>,
    pub registry: Arc<ChannelRegistry>,
    pub runs: RunService,
    pub sender_service: SenderService,
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<herald_metrics::MetricsHandle>,
}

impl GatewayState {
    pub fn new(pool: SqlitePool, factory: Arc<dyn ClientFactory>, dispatch: DispatchConfig) -> Self {
        let rooms = Arc::new(SqliteRoomStore::new(pool.clone()));
        let senders = Arc::new(SqliteSenderStore::new(pool.clone()));
        let run_log = Arc::new(SqliteRunLog::new(pool));
        let registry = Arc::new(ChannelRegistry::new(factory).with_store(senders.clone()));

        let dispatcher = Dispatcher::new(registry.clone(), run_log.clone());
        let runs = RunService::new(rooms.clone(), senders.clone(), dispatcher, dispatch);
        let sender_service = SenderService::new(rooms.clone(), senders.clone(), registry.clone());

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            rooms,
            senders,
            run_log,
            registry,
            runs,
            sender_service,
            #[cfg(feature = "metrics")]
            metrics_handle: None,
        }
    }

    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics_handle(mut self, handle: herald_metrics::MetricsHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
