//! Background WebSocket task for one credential.
//!
//! ARCHITECTURE
//! ============
//! A [`Connection`] owns a spawned task that dials `{ws_url}/carts` with the
//! access token in the upgrade request, then pumps two directions at once:
//! queued [`ClientEvent`]s out, [`ServerEvent`]s into [`CartShared`]. When the
//! socket drops the task waits with exponential backoff and dials again.
//!
//! Each successful connect re-joins the active cart before anything else is
//! sent, so room membership survives transport reconnects.
//!
//! Dropping the handle aborts the task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::protocol::{ClientEvent, ServerEvent};
use super::store::CartShared;
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Where and how persistently to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Base URL of the realtime server (`http(s)://` or `ws(s)://`).
    pub ws_url: String,
    pub reconnect: ReconnectPolicy,
}

impl ConnectionSettings {
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self { ws_url: config.ws_url.clone(), reconnect: config.reconnect }
    }
}

#[derive(Default)]
struct LinkStatus {
    connected: AtomicBool,
    connecting: AtomicBool,
}

pub(crate) struct Connection {
    token: String,
    outbox: mpsc::UnboundedSender<ClientEvent>,
    status: Arc<LinkStatus>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Start the connection task. Returns `None` outside a tokio runtime.
    pub(crate) fn spawn(settings: &ConnectionSettings, token: String, shared: Arc<CartShared>) -> Option<Self> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime; realtime connection not started");
            return None;
        };

        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let status = Arc::new(LinkStatus::default());
        status.connecting.store(true, Ordering::SeqCst);
        let task = handle.spawn(run(settings.clone(), token.clone(), shared, Arc::clone(&status), outbox_rx));

        Some(Self { token, outbox, status, task })
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.status.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn is_connecting(&self) -> bool {
        self.status.connecting.load(Ordering::SeqCst)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Queue an event for the socket. Events queued while disconnected go
    /// out after the next connect.
    pub(crate) fn send(&self, event: ClientEvent) -> bool {
        self.outbox.send(event).is_ok()
    }

    pub(crate) fn close(self) {
        tracing::debug!("closing realtime connection");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
        self.status.connected.store(false, Ordering::SeqCst);
        self.status.connecting.store(false, Ordering::SeqCst);
    }
}

enum DriveEnd {
    /// The server closed the socket; dial again.
    Closed,
    /// The handle went away; stop for good.
    Shutdown,
}

async fn run(
    settings: ConnectionSettings,
    token: String,
    shared: Arc<CartShared>,
    status: Arc<LinkStatus>,
    mut outbox: mpsc::UnboundedReceiver<ClientEvent>,
) {
    let mut backoff = settings.reconnect.initial();
    let max_backoff = settings.reconnect.max();

    loop {
        status.connecting.store(true, Ordering::SeqCst);

        match open(&settings.ws_url, &token).await {
            Ok(stream) => {
                status.connecting.store(false, Ordering::SeqCst);
                status.connected.store(true, Ordering::SeqCst);
                backoff = settings.reconnect.initial();
                tracing::info!(url = %settings.ws_url, "realtime connected");

                let outcome = drive(stream, &shared, &mut outbox).await;
                status.connected.store(false, Ordering::SeqCst);

                match outcome {
                    Ok(DriveEnd::Shutdown) => return,
                    Ok(DriveEnd::Closed) => tracing::info!("realtime disconnected"),
                    Err(error) => tracing::warn!(%error, "realtime connection failed"),
                }
            }
            Err(error) => {
                status.connecting.store(false, Ordering::SeqCst);
                tracing::warn!(%error, backoff_ms = backoff.as_millis(), "realtime connect failed");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn open(ws_url: &str, token: &str) -> Result<WsStream, ClientError> {
    let mut request = carts_url(ws_url)?.into_client_request()?;
    let credential = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| ClientError::InvalidHeader(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, credential);

    let (stream, _) = connect_async(request).await?;
    Ok(stream)
}

async fn drive(
    stream: WsStream,
    shared: &CartShared,
    outbox: &mut mpsc::UnboundedReceiver<ClientEvent>,
) -> Result<DriveEnd, ClientError> {
    let (mut sink, mut source) = stream.split();

    if let Some(cart_id) = shared.active_cart_id() {
        tracing::debug!(%cart_id, "re-joining active cart");
        sink.send(Message::Text(ClientEvent::JoinCart { cart_id }.encode().into())).await?;
    }

    loop {
        tokio::select! {
            outgoing = outbox.recv() => {
                let Some(event) = outgoing else {
                    let _ = sink.close().await;
                    return Ok(DriveEnd::Shutdown);
                };
                tracing::debug!(event = event.name(), "realtime send");
                sink.send(Message::Text(event.encode().into())).await?;
            }
            incoming = source.next() => {
                match incoming {
                    None | Some(Ok(Message::Close(_))) => return Ok(DriveEnd::Closed),
                    Some(Err(error)) => return Err(error.into()),
                    Some(Ok(Message::Text(text))) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => shared.apply(event),
                        Err(error) => tracing::warn!(%error, "dropping malformed realtime message"),
                    },
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Convert the realtime base URL into the carts socket URL.
///
/// # Errors
///
/// Returns [`ClientError::InvalidBaseUrl`] for schemes other than
/// `http`, `https`, `ws`, and `wss`.
pub fn carts_url(base_url: &str) -> Result<String, ClientError> {
    let trimmed = base_url.trim_end_matches('/');

    if let Some(rest) = trimmed.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/carts"));
    }
    if let Some(rest) = trimmed.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/carts"));
    }
    if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        return Ok(format!("{trimmed}/carts"));
    }

    Err(ClientError::InvalidBaseUrl(base_url.to_owned()))
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
