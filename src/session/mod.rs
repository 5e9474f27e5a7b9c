//! # Relay Session Core
//!
//! One `Session` relays audio between one browser connection (the client leg)
//! and one remote speech service connection (the remote leg).
//!
//! ## Components:
//! - **registry**: process-wide table of live sessions
//! - **lifecycle**: creation handshake and the single teardown path
//! - **bridge**: per-session loop merging client messages and remote audio
//! - **monitor**: per-session idle timeout
//! - **messages**: JSON messages exchanged with the browser
//!
//! ## Session Lifecycle:
//! 1. **Active**: both legs open, bridge running
//! 2. **Closing**: one trigger won the teardown race and is releasing both legs
//! 3. **Closed**: terminal; legs released, entry removed from the registry
//!
//! Teardown can be triggered by the client disconnecting, an explicit
//! end-session request, the idle monitor, or the administrative force-stop.
//! Only the first trigger does any work.

pub mod bridge;
pub mod lifecycle;
pub mod messages;
pub mod monitor;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::SessionLifecycle;
pub use registry::SessionRegistry;

use crate::error::RelayResult;
use crate::realtime::protocol::TurnDetection;
use crate::realtime::transport::{Credentials, Endpoint, RemoteTransport};

use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Outbound half of the client leg.
///
/// Inbound client traffic arrives separately as [`ClientFrame`]s on a channel,
/// so the bridge can race it against remote audio.
#[async_trait]
pub trait ClientLink: Send + Sync {
    /// Send one text message to the browser.
    async fn send_text(&self, text: String) -> RelayResult<()>;

    /// Close the browser socket. Best-effort, never fails.
    async fn close(&self);
}

/// Something that happened on the client socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// A text message
    Text(String),
    /// The socket closed or errored
    Closed,
}

/// Everything a session needs to dial and supervise its remote leg.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub credentials: Credentials,
    pub endpoint: Endpoint,
    pub turn_detection: TurnDetection,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub idle_check_interval: Duration,
    pub remote_queue_capacity: usize,
}

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

/// One end-to-end relay instance.
///
/// ## Ownership:
/// The session exclusively owns both legs. The remote leg may be replaced in
/// place by a reconnect; the client leg lives as long as the session.
pub struct Session {
    id: String,
    client: Arc<dyn ClientLink>,
    remote: RemoteTransport,
    state: RwLock<SessionState>,
    last_activity: RwLock<Instant>,
    closing: watch::Sender<bool>,
}

impl Session {
    pub fn new(id: String, client: Arc<dyn ClientLink>, remote: RemoteTransport) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            id,
            client,
            remote,
            state: RwLock::new(SessionState::Active),
            last_activity: RwLock::new(Instant::now()),
            closing,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client(&self) -> &dyn ClientLink {
        self.client.as_ref()
    }

    pub fn remote(&self) -> &RemoteTransport {
        &self.remote
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record audio moving in either direction. Never moves backwards.
    pub fn touch(&self) {
        let now = Instant::now();
        let mut last = self.last_activity.write().unwrap_or_else(PoisonError::into_inner);
        if now > *last {
            *last = now;
        }
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the last audio transfer.
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Active → Closing. Returns `true` only for the caller that made the
    /// transition; that caller owns the teardown. Also wakes the bridge and
    /// the idle monitor.
    pub(crate) fn begin_closing(&self) -> bool {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if *state != SessionState::Active {
                return false;
            }
            *state = SessionState::Closing;
        }
        self.closing.send_replace(true);
        true
    }

    pub(crate) fn mark_closed(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = SessionState::Closed;
    }

    /// Receiver that flips to `true` once teardown has begun.
    pub fn closing_signal(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
