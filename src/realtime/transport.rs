//! # Remote Speech Service Transport
//!
//! Owns the one persistent socket a session keeps open to the realtime speech
//! API.
//!
//! ## Structure:
//! - **`RemoteConnector`**: "send credentials, obtain a connected socket". The
//!   production implementation is [`WsConnector`] (tokio-tungstenite); tests
//!   plug in an in-memory connector.
//! - **`RemoteTransport`**: per-session link. Pushes the configuration event,
//!   sends audio, reconnects when the socket has dropped, and closes.
//! - **Reader worker**: one spawned task per connection that reads events and
//!   queues audio increments for the session's event bridge.
//!
//! ## Reconnect policy:
//! The link is replaced in place. Audio produced while the link is down is
//! dropped, never retried in a loop.

use crate::error::{RelayError, RelayResult};
use crate::realtime::protocol::{RemoteCommand, RemoteEvent, TurnDetection};
use crate::session::RelaySettings;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

/// API key for the remote service. Never printed.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("api_key", &"<redacted>").finish()
    }
}

/// Remote service location.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub model: String,
    pub beta_header: String,
}

impl Endpoint {
    /// Socket URL with the model selected through the query string.
    pub fn request_url(&self) -> String {
        if self.model.is_empty() {
            return self.url.clone();
        }
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.url, separator, self.model)
    }
}

/// Write half of a remote connection.
#[async_trait]
pub trait RemoteSink: Send {
    async fn send_text(&mut self, text: String) -> RelayResult<()>;

    /// Best-effort close; never fails.
    async fn close(&mut self);
}

/// Read half of a remote connection.
#[async_trait]
pub trait RemoteStream: Send {
    /// Next text frame. `None` once the connection is closed.
    async fn next_text(&mut self) -> Option<RelayResult<String>>;
}

/// A freshly connected socket, split into halves.
pub struct RemoteConnection {
    pub sink: Box<dyn RemoteSink>,
    pub stream: Box<dyn RemoteStream>,
}

/// Opens connections to the remote service.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, credentials: &Credentials, endpoint: &Endpoint) -> RelayResult<RemoteConnection>;
}

type WsSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// tokio-tungstenite connector used in production.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl RemoteConnector for WsConnector {
    async fn connect(&self, credentials: &Credentials, endpoint: &Endpoint) -> RelayResult<RemoteConnection> {
        if credentials.is_empty() {
            return Err(RelayError::Connect("no API key configured".to_string()));
        }

        let mut request = endpoint
            .request_url()
            .into_client_request()
            .map_err(|e| RelayError::Connect(format!("invalid endpoint: {}", e)))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", credentials.api_key()))
            .map_err(|e| RelayError::Connect(format!("invalid credentials: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let beta = HeaderValue::from_str(&endpoint.beta_header)
            .map_err(|e| RelayError::Connect(format!("invalid beta header: {}", e)))?;
        request.headers_mut().insert("openai-beta", beta);

        let (socket, response) = connect_async(request)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        debug!(status = %response.status(), "Remote speech service handshake complete");

        let (sink, stream) = socket.split();
        Ok(RemoteConnection {
            sink: Box::new(WsSink(sink)),
            stream: Box::new(WsStream(stream)),
        })
    }
}

struct WsSink(SplitSink<WsSocket, Message>);

#[async_trait]
impl RemoteSink for WsSink {
    async fn send_text(&mut self, text: String) -> RelayResult<()> {
        self.0
            .send(Message::Text(text))
            .await
            .map_err(|e| RelayError::TransientSend(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.0.close().await {
            debug!(error = %e, "Remote socket close failed");
        }
    }
}

struct WsStream(SplitStream<WsSocket>);

#[async_trait]
impl RemoteStream for WsStream {
    async fn next_text(&mut self) -> Option<RelayResult<String>> {
        while let Some(frame) = self.0.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(reason)) => {
                    debug!(?reason, "Remote speech service closed the socket");
                    return None;
                }
                // Pings are answered by tungstenite itself; binary frames are not part of the protocol
                Ok(_) => continue,
                Err(e) => return Some(Err(RelayError::Closed(e.to_string()))),
            }
        }
        None
    }
}

/// Next audio increment from the remote leg.
///
/// Event kinds other than audio deltas are discarded here, as are frames that
/// do not decode. Returns `None` when the connection has ended.
pub async fn receive(stream: &mut dyn RemoteStream) -> Option<RelayResult<String>> {
    loop {
        match stream.next_text().await? {
            Ok(text) => match RemoteEvent::parse(&text) {
                Ok(RemoteEvent::AudioDelta(delta)) => return Some(Ok(delta)),
                Ok(RemoteEvent::Other(kind)) => trace!(kind = %kind, "Ignoring remote event"),
                Err(e) => warn!(error = %e, "Undecodable remote event"),
            },
            Err(e) => return Some(Err(e)),
        }
    }
}

/// Reader worker: drains one connection into the session's audio queue.
///
/// Ends when the socket closes, a receive fails, or the bridge has gone away.
/// Always leaves the connection marked as disconnected.
async fn receive_loop(
    session_id: String,
    mut stream: Box<dyn RemoteStream>,
    audio: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
) {
    loop {
        match receive(stream.as_mut()).await {
            Some(Ok(delta)) => {
                if audio.send(delta).await.is_err() {
                    debug!(session_id = %session_id, "Audio queue closed, stopping remote reader");
                    break;
                }
            }
            Some(Err(e)) => {
                warn!(session_id = %session_id, error = %e, "Remote receive failed");
                break;
            }
            None => {
                info!(session_id = %session_id, "Remote leg closed");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

/// One live connection plus its reader worker.
struct RemoteHandle {
    sink: Box<dyn RemoteSink>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl RemoteHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close the socket; dropping the handle then aborts the reader.
    async fn release(mut self) {
        self.sink.close().await;
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        // A replaced or closed handle must not leave its reader running
        self.reader.abort();
    }
}

/// Per-session link to the remote speech service.
///
/// ## States:
/// - handle present and connected: normal operation
/// - handle present, reader has seen the socket end: disconnected, next
///   `ensure_connected` replaces it
/// - handle absent: a reconnect is in flight or failed, or the transport is closed
///
/// The `link` lock is never held while dialing. Once `close` has run, no
/// handle is ever installed again: a dial that finishes afterwards closes its
/// own socket.
pub struct RemoteTransport {
    session_id: String,
    connector: Arc<dyn RemoteConnector>,
    credentials: Credentials,
    endpoint: Endpoint,
    turn_detection: TurnDetection,
    connect_timeout: Duration,
    audio: mpsc::Sender<String>,
    link: Mutex<Option<RemoteHandle>>,
    closed: AtomicBool,
}

impl RemoteTransport {
    /// Connect, push the configuration event, start the reader worker.
    ///
    /// Audio increments read from the remote leg are delivered to `audio`,
    /// across reconnects.
    pub async fn connect(
        session_id: &str,
        connector: Arc<dyn RemoteConnector>,
        settings: &RelaySettings,
        audio: mpsc::Sender<String>,
    ) -> RelayResult<Self> {
        let transport = Self {
            session_id: session_id.to_string(),
            connector,
            credentials: settings.credentials.clone(),
            endpoint: settings.endpoint.clone(),
            turn_detection: settings.turn_detection.clone(),
            connect_timeout: settings.connect_timeout,
            audio,
            link: Mutex::new(None),
            closed: AtomicBool::new(false),
        };

        let handle = transport.open().await?;
        *transport.link.lock().await = Some(handle);
        info!(session_id = %session_id, endpoint = %transport.endpoint.url, "Remote leg connected");
        Ok(transport)
    }

    /// Dial and configure one connection, bounded by the connect timeout.
    async fn open(&self) -> RelayResult<RemoteHandle> {
        let dial = async {
            let RemoteConnection { mut sink, stream } = self
                .connector
                .connect(&self.credentials, &self.endpoint)
                .await?;

            if let Err(e) = configure(sink.as_mut(), &self.turn_detection).await {
                sink.close().await;
                return Err(e);
            }
            Ok((sink, stream))
        };

        let (sink, stream) = tokio::time::timeout(self.connect_timeout, dial)
            .await
            .map_err(|_| {
                RelayError::Connect(format!("no connection within {}s", self.connect_timeout.as_secs()))
            })??;

        let connected = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(receive_loop(
            self.session_id.clone(),
            stream,
            self.audio.clone(),
            connected.clone(),
        ));

        Ok(RemoteHandle { sink, connected, reader })
    }

    fn ensure_open(&self) -> RelayResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed("remote transport closed".to_string()));
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.as_ref().map(RemoteHandle::is_connected).unwrap_or(false)
    }

    /// Make sure a connected handle is in place.
    ///
    /// Performs at most one reconnect attempt. Returns `Ok(true)` when a new
    /// connection replaced a dropped (or missing) one, `Ok(false)` when the
    /// existing one was fine. On failure the link is left absent.
    pub async fn ensure_connected(&self) -> RelayResult<bool> {
        self.ensure_open()?;

        let stale = {
            let mut link = self.link.lock().await;
            self.ensure_open()?;
            if link.as_ref().map(RemoteHandle::is_connected).unwrap_or(false) {
                return Ok(false);
            }
            link.take()
        };
        if let Some(stale) = stale {
            stale.release().await;
        }

        info!(session_id = %self.session_id, "Reconnecting to remote speech service");
        let handle = self.open().await?;

        let mut link = self.link.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            drop(link);
            handle.release().await;
            debug!(session_id = %self.session_id, "Transport closed during reconnect, dropping new connection");
            return Err(RelayError::Closed("remote transport closed".to_string()));
        }
        if link.as_ref().map(RemoteHandle::is_connected).unwrap_or(false) {
            // Someone else reconnected first; keep theirs
            drop(link);
            handle.release().await;
            return Ok(false);
        }
        *link = Some(handle);
        info!(session_id = %self.session_id, "Reconnected to remote speech service");
        Ok(true)
    }

    /// Send one audio-append event carrying base64 PCM16.
    ///
    /// Fails with `TransientSend` if the link is down or the write fails; in
    /// the latter case the link is marked disconnected.
    pub async fn send_audio(&self, audio: String) -> RelayResult<()> {
        let text = RemoteCommand::InputAudioAppend { audio }.to_json()?;

        let mut link = self.link.lock().await;
        let handle = link
            .as_mut()
            .filter(|handle| handle.is_connected())
            .ok_or_else(|| RelayError::TransientSend("remote leg not connected".to_string()))?;

        if let Err(e) = handle.sink.send_text(text).await {
            handle.connected.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Best-effort stop event, then socket close. Idempotent, never fails.
    ///
    /// After this the transport refuses to reconnect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = self.link.lock().await.take();
        if let Some(mut handle) = handle {
            if handle.is_connected() {
                match RemoteCommand::ControlStop.to_json() {
                    Ok(stop) => {
                        if let Err(e) = handle.sink.send_text(stop).await {
                            debug!(session_id = %self.session_id, error = %e, "Stop event not delivered");
                        }
                    }
                    Err(e) => debug!(error = %e, "Could not encode stop event"),
                }
            }
            handle.sink.close().await;
            // Dropping the handle aborts the reader if the close did not end it
        }
        debug!(session_id = %self.session_id, "Remote leg closed");
    }
}

/// Push the turn-detection configuration. Must precede any audio.
pub async fn configure(sink: &mut dyn RemoteSink, turn_detection: &TurnDetection) -> RelayResult<()> {
    let text = RemoteCommand::configure(turn_detection).to_json()?;
    sink.send_text(text)
        .await
        .map_err(|e| RelayError::Connect(format!("configuration not accepted: {}", e)))
}
