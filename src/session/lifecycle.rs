//! # Session Lifecycle
//!
//! Creation and teardown of relay sessions as one scoped unit.
//!
//! ## Creation:
//! 1. Generate the session id and send it to the client
//! 2. Connect and configure the remote leg, start its reader worker
//! 3. Register the session
//! 4. Start the idle monitor
//!
//! If the remote leg cannot be set up, the client is told, its socket is
//! closed, and nothing is registered.
//!
//! ## Teardown:
//! Every trigger funnels into [`SessionLifecycle::close_session`]. The first
//! caller flips the session to `Closing` and does the work; everyone else
//! returns immediately. Teardown never fails: each step is best-effort and
//! the registry entry is always removed last.

use crate::error::{RelayError, RelayResult};
use crate::realtime::transport::{RemoteConnector, RemoteTransport};
use crate::session::bridge::EventBridge;
use crate::session::messages::ServerMessage;
use crate::session::monitor::IdleMonitor;
use crate::session::{ClientFrame, ClientLink, RelaySettings, Session, SessionRegistry};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on waiting for the remote leg to close during teardown.
const REMOTE_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SessionLifecycle {
    registry: SessionRegistry,
    connector: Arc<dyn RemoteConnector>,
    settings: Arc<RelaySettings>,
}

impl SessionLifecycle {
    pub fn new(registry: SessionRegistry, connector: Arc<dyn RemoteConnector>, settings: RelaySettings) -> Self {
        Self {
            registry,
            connector,
            settings: Arc::new(settings),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Drive one client connection from handshake to teardown.
    ///
    /// `inbound` carries the client's socket traffic; the session ends when it
    /// reports a close, the client asks to end, or another trigger tears the
    /// session down.
    pub async fn run(&self, client: Arc<dyn ClientLink>, inbound: mpsc::Receiver<ClientFrame>) {
        let (session, remote_audio) = match self.create(client).await {
            Ok(created) => created,
            Err(e) => {
                warn!(error = %e, "Session could not be started");
                return;
            }
        };

        let exit = EventBridge::new(session.clone()).run(inbound, remote_audio).await;
        info!(session_id = %session.id(), reason = ?exit, "Event bridge stopped");

        self.close_session(&session).await;
    }

    /// Handshake a new session.
    ///
    /// Returns the registered session and the queue its remote reader feeds.
    pub async fn create(&self, client: Arc<dyn ClientLink>) -> RelayResult<(Arc<Session>, mpsc::Receiver<String>)> {
        let session_id = Uuid::new_v4().to_string();

        let hello = ServerMessage::SessionId { session_id: session_id.clone() }.to_json()?;
        if let Err(e) = client.send_text(hello).await {
            client.close().await;
            return Err(RelayError::Handshake(format!("client went away: {}", e)));
        }
        info!(session_id = %session_id, "Assigned session id");

        let (audio_tx, audio_rx) = mpsc::channel(self.settings.remote_queue_capacity);
        let remote = match RemoteTransport::connect(&session_id, self.connector.clone(), &self.settings, audio_tx).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Remote leg setup failed");
                notify_client(client.as_ref(), ServerMessage::Error {
                    message: "Could not connect to the speech service".to_string(),
                })
                .await;
                client.close().await;
                return Err(RelayError::Handshake(e.to_string()));
            }
        };

        let session = Arc::new(Session::new(session_id, client, remote));
        if let Err(e) = self.registry.insert(session.clone()) {
            // The entry under this id belongs to someone else; release our legs only
            session.begin_closing();
            session.client().close().await;
            session.remote().close().await;
            session.mark_closed();
            return Err(e);
        }

        IdleMonitor::new(self.settings.idle_timeout, self.settings.idle_check_interval)
            .spawn(session.clone(), self.clone());

        info!(session_id = %session.id(), active_sessions = self.registry.len(), "Session started");
        Ok((session, audio_rx))
    }

    /// Tear down the session with this id, if it is still registered.
    ///
    /// Returns `true` if this call performed the teardown.
    pub async fn terminate(&self, session_id: &str) -> bool {
        match self.registry.lookup(session_id) {
            Ok(session) => self.close_session(&session).await,
            Err(_) => {
                debug!(session_id = %session_id, "Terminate on unregistered session ignored");
                false
            }
        }
    }

    /// Release both legs and unregister.
    ///
    /// Safe to call concurrently from the bridge, the idle monitor and the
    /// administrative path; only the first caller does anything.
    pub async fn close_session(&self, session: &Arc<Session>) -> bool {
        if !session.begin_closing() {
            debug!(session_id = %session.id(), state = session.state().as_str(), "Session already closing");
            return false;
        }
        let remote_connected = session.remote().is_connected().await;
        debug!(
            session_id = %session.id(),
            remote_connected,
            idle_secs = session.idle_for().as_secs(),
            "Releasing session legs"
        );

        notify_client(session.client(), ServerMessage::SessionEnd).await;
        session.client().close().await;

        // Spawned so a slow close still completes after we stop waiting
        let remote_close = tokio::spawn({
            let session = session.clone();
            async move { session.remote().close().await }
        });
        if tokio::time::timeout(REMOTE_CLOSE_TIMEOUT, remote_close).await.is_err() {
            warn!(session_id = %session.id(), "Remote leg did not close in time, finishing in background");
        }

        session.mark_closed();
        self.registry.remove(session.id());
        info!(session_id = %session.id(), active_sessions = self.registry.len(), "Session closed");
        true
    }

    /// Administrative force stop.
    pub async fn force_stop(&self, session_id: &str) -> RelayResult<()> {
        let session = self.registry.lookup(session_id)?;
        if self.close_session(&session).await {
            info!(session_id = %session_id, "Force-stopped session");
        }
        Ok(())
    }

    /// Tear down every registered session. Used on process shutdown.
    pub async fn shutdown_all(&self) -> usize {
        let mut closed = 0;
        for session_id in self.registry.ids() {
            if self.terminate(&session_id).await {
                closed += 1;
            }
        }
        closed
    }
}

/// Best-effort message to the browser.
async fn notify_client(client: &dyn ClientLink, message: ServerMessage) {
    match message.to_json() {
        Ok(text) => {
            if let Err(e) = client.send_text(text).await {
                debug!(error = %e, "Client notification not delivered");
            }
        }
        Err(e) => debug!(error = %e, "Could not encode client notification"),
    }
}
