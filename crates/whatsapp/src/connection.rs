use std::{sync::Arc, time::Duration};

use {
    dashmap::DashMap,
    futures::{SinkExt, StreamExt},
    herald_channels::{ClientEvent, Error, Result},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::protocol::{GatewayFrame, SidecarFrame};

/// Maximum backoff between connection attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

type Routes = Arc<DashMap<String, mpsc::Sender<ClientEvent>>>;
type Pending = Arc<DashMap<String, oneshot::Sender<std::result::Result<(), String>>>>;

/// One WebSocket connection to the sidecar, shared by every account.
///
/// Inbound lifecycle frames are routed to the account's event channel,
/// `send_result` frames complete the matching pending request. When the
/// socket closes every routed account receives `Disconnected` and every
/// pending request fails.
pub struct SidecarConnection {
    write_tx: mpsc::UnboundedSender<String>,
    routes: Routes,
    pending: Pending,
    closed: CancellationToken,
}

impl SidecarConnection {
    pub async fn connect(url: &str) -> anyhow::Result<Arc<Self>> {
        let (ws, _response) = connect_async(url).await?;
        let (sink, stream) = ws.split();
        let (write_tx, write_rx) = mpsc::unbounded_channel::<String>();

        let conn = Arc::new(Self {
            write_tx,
            routes: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            closed: CancellationToken::new(),
        });

        tokio::spawn(write_loop(sink, write_rx, conn.closed.clone()));
        tokio::spawn(read_loop(
            stream,
            Arc::clone(&conn.routes),
            Arc::clone(&conn.pending),
            conn.closed.clone(),
        ));

        info!(url, "connected to whatsapp sidecar");
        Ok(conn)
    }

    /// Connect, retrying with exponential backoff up to `attempts` times.
    pub async fn connect_with_retry(url: &str, attempts: u32) -> anyhow::Result<Arc<Self>> {
        let attempts = attempts.max(1);
        let mut backoff = Duration::from_millis(500);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match Self::connect(url).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    warn!(url, attempt, attempts, error = %e, "sidecar connection failed");
                    last_error = Some(e);
                },
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("no connection attempt made"))
            .context(format!("could not reach whatsapp sidecar at {url}")))
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Route lifecycle frames for `account_id` to `events`, replacing any
    /// previous route.
    pub fn register(&self, account_id: &str, events: mpsc::Sender<ClientEvent>) {
        self.routes.insert(account_id.to_string(), events);
    }

    /// Drop the route for `account_id` if it still points at `events`.
    pub fn unregister(&self, account_id: &str, events: &mpsc::Sender<ClientEvent>) {
        self.routes
            .remove_if(account_id, |_, route| route.same_channel(events));
    }

    pub fn send_frame(&self, frame: &GatewayFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::send_failed("sidecar is not connected"));
        }
        let json = serde_json::to_string(frame).map_err(Error::send_failed)?;
        self.write_tx
            .send(json)
            .map_err(|_| Error::send_failed("sidecar writer has stopped"))
    }

    /// Ask the sidecar to deliver a message and wait for its `send_result`.
    pub async fn request_send(
        &self,
        account_id: &str,
        to: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<()> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let frame = GatewayFrame::Send {
            request_id: request_id.clone(),
            account_id: account_id.to_string(),
            to: to.to_string(),
            text: text.to_string(),
        };
        if let Err(e) = self.send_frame(&frame) {
            self.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(Error::send_failed(message)),
            Ok(Err(_)) => Err(Error::send_failed("sidecar connection lost")),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(Error::send_failed(format!(
                    "no send result from sidecar within {}s",
                    timeout.as_secs()
                )))
            },
        }
    }

    /// Close the socket. Routed accounts are disconnected.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

impl Drop for SidecarConnection {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    closed: CancellationToken,
) where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            json = write_rx.recv() => {
                let Some(json) = json else { break };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    warn!(error = %e, "sidecar write failed");
                    closed.cancel();
                    break;
                }
            },
        }
    }
    let _ = sink.close().await;
}

async fn read_loop<S>(mut stream: S, routes: Routes, pending: Pending, closed: CancellationToken)
where
    S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let reason = loop {
        tokio::select! {
            () = closed.cancelled() => break "sidecar connection closed".to_string(),
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<SidecarFrame>(&text) {
                    Ok(frame) => route_frame(frame, &routes, &pending).await,
                    Err(e) => warn!(error = %e, "unparseable sidecar frame"),
                },
                Some(Ok(Message::Close(_))) | None => break "sidecar closed the connection".to_string(),
                Some(Ok(_)) => {},
                Some(Err(e)) => break format!("sidecar connection error: {e}"),
            },
        }
    };

    closed.cancel();
    warn!(reason, accounts = routes.len(), "sidecar connection lost");

    let accounts: Vec<_> = routes
        .iter()
        .map(|r| (r.key().clone(), r.value().clone()))
        .collect();
    routes.clear();
    for (account_id, events) in accounts {
        debug!(account_id, "disconnecting account after sidecar loss");
        let _ = events
            .send(ClientEvent::Disconnected {
                reason: reason.clone(),
            })
            .await;
    }

    let request_ids: Vec<_> = pending.iter().map(|p| p.key().clone()).collect();
    for request_id in request_ids {
        if let Some((_, tx)) = pending.remove(&request_id) {
            let _ = tx.send(Err("sidecar connection lost".into()));
        }
    }
}

async fn route_frame(frame: SidecarFrame, routes: &Routes, pending: &Pending) {
    let (account_id, event) = match frame {
        SidecarFrame::SendResult {
            request_id,
            success,
            error,
        } => {
            match pending.remove(&request_id) {
                Some((_, tx)) => {
                    let outcome = if success {
                        Ok(())
                    } else {
                        Err(error.unwrap_or_else(|| "send failed".into()))
                    };
                    let _ = tx.send(outcome);
                },
                None => debug!(request_id, "send result for unknown request"),
            }
            return;
        },
        SidecarFrame::Error { account_id, error } => {
            warn!(?account_id, error, "sidecar error");
            return;
        },
        SidecarFrame::Qr { account_id, qr } => (account_id, ClientEvent::Challenge(qr)),
        SidecarFrame::Authenticated { account_id } => (account_id, ClientEvent::Authenticated),
        SidecarFrame::AuthFailure {
            account_id,
            message,
        } => (account_id, ClientEvent::AuthFailure(message)),
        SidecarFrame::Ready {
            account_id,
            phone_number,
        } => (account_id, ClientEvent::Ready {
            account: phone_number,
        }),
        SidecarFrame::Disconnected { account_id, reason } => {
            (account_id, ClientEvent::Disconnected { reason })
        },
    };

    let Some(events) = routes.get(&account_id).map(|r| r.value().clone()) else {
        debug!(account_id, "frame for unrouted account");
        return;
    };
    if events.send(event).await.is_err() {
        debug!(account_id, "account session is gone, dropping route");
        routes.remove_if(&account_id, |_, route| route.same_channel(&events));
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tokio::net::TcpListener, tokio_tungstenite::accept_async};

    /// Sidecar that forwards every text frame it receives.
    async fn echo_sidecar() -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = tx.send(text.as_str().to_owned());
                }
            }
        });
        (url, rx)
    }

    #[tokio::test]
    async fn send_frame_writes_every_gateway_frame() {
        let (url, mut received) = echo_sidecar().await;
        let conn = SidecarConnection::connect(&url).await.unwrap();

        let frames = [
            GatewayFrame::Login {
                account_id: "s1".into(),
                client_id: "c1".into(),
            },
            GatewayFrame::Send {
                request_id: "r1".into(),
                account_id: "s1".into(),
                to: "6281@c.us".into(),
                text: "hi".into(),
            },
            GatewayFrame::Logout {
                account_id: "s1".into(),
            },
        ];
        for frame in &frames {
            conn.send_frame(frame).unwrap();
            let text = received.recv().await.unwrap();
            let parsed: GatewayFrame = serde_json::from_str(&text).unwrap();
            assert_eq!(&parsed, frame);
        }
    }

    #[tokio::test]
    async fn send_frame_after_close_fails() {
        let (url, _received) = echo_sidecar().await;
        let conn = SidecarConnection::connect(&url).await.unwrap();
        conn.close();
        let err = conn
            .send_frame(&GatewayFrame::Logout {
                account_id: "s1".into(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::SendFailed { .. }));
    }
}
