use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    herald_channels::{
        ChannelConfig, ClientEvent, ClientFactory, ClientHandle, Error, MessagingClient, Result,
    },
    herald_config::SidecarConfig,
    tokio::sync::{Mutex, mpsc},
    tracing::{debug, info},
};

use crate::{connection::SidecarConnection, protocol::GatewayFrame};

/// Starts WhatsApp Web sessions through the sidecar. The connection is
/// opened on first use and reopened when it has dropped.
pub struct WhatsAppClientFactory {
    config: SidecarConfig,
    connection: Mutex<Option<Arc<SidecarConnection>>>,
}

impl WhatsAppClientFactory {
    pub fn new(config: SidecarConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    async fn connection(&self) -> anyhow::Result<Arc<SidecarConnection>> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref()
            && conn.is_connected()
        {
            return Ok(Arc::clone(conn));
        }
        let conn =
            SidecarConnection::connect_with_retry(&self.config.url, self.config.connect_retries)
                .await?;
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Close the sidecar connection, if open.
    pub async fn close(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            conn.close();
        }
    }
}

#[async_trait]
impl ClientFactory for WhatsAppClientFactory {
    async fn start(&self, channel_id: &str, config: &ChannelConfig) -> Result<ClientHandle> {
        let connection = self.connection().await.map_err(Error::init_failed)?;

        let (events_tx, events) = mpsc::channel(32);
        connection.register(channel_id, events_tx.clone());
        let login = GatewayFrame::Login {
            account_id: channel_id.to_string(),
            client_id: config.client_id.clone(),
        };
        if let Err(e) = connection.send_frame(&login) {
            connection.unregister(channel_id, &events_tx);
            return Err(Error::init_failed(e));
        }
        info!(channel_id, client_id = %config.client_id, "requested whatsapp web login");

        let client = WhatsAppClient {
            account_id: channel_id.to_string(),
            connection,
            route: events_tx,
            request_timeout: self.config.request_timeout(),
            shut_down: AtomicBool::new(false),
        };
        Ok(ClientHandle {
            client: Arc::new(client),
            events,
        })
    }
}

/// One logged-in account on the sidecar.
pub struct WhatsAppClient {
    account_id: String,
    connection: Arc<SidecarConnection>,
    route: mpsc::Sender<ClientEvent>,
    request_timeout: Duration,
    shut_down: AtomicBool,
}

#[async_trait]
impl MessagingClient for WhatsAppClient {
    async fn send(&self, to: &str, text: &str) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::send_failed("client has been shut down"));
        }
        self.connection
            .request_send(&self.account_id, to, text, self.request_timeout)
            .await
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connection.unregister(&self.account_id, &self.route);
        if self.connection.is_connected() {
            let logout = GatewayFrame::Logout {
                account_id: self.account_id.clone(),
            };
            if let Err(e) = self.connection.send_frame(&logout) {
                debug!(account_id = %self.account_id, error = %e, "logout frame not sent");
            }
        }
        info!(account_id = %self.account_id, "whatsapp web client shut down");
    }
}
