//! Test doubles for the client leg, plus session fixtures.

use crate::error::{RelayError, RelayResult};
use crate::realtime::protocol::TurnDetection;
use crate::realtime::testing::{FakeConnector, FakeRemote};
use crate::realtime::transport::{Credentials, Endpoint, RemoteTransport};
use crate::session::{ClientLink, RelaySettings, Session};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Records what the relay sent to the browser.
pub struct FakeClient {
    sent: Mutex<Vec<String>>,
    closes: AtomicUsize,
    open: AtomicBool,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            open: AtomicBool::new(true),
        })
    }

    pub fn messages(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn messages_of_type(&self, kind: &str) -> Vec<Value> {
        self.messages().into_iter().filter(|m| m["type"] == kind).collect()
    }

    /// Audio payloads of the `audio_chunk` messages, in delivery order.
    pub fn audio_chunks(&self) -> Vec<String> {
        self.messages_of_type("audio_chunk")
            .into_iter()
            .map(|m| m["audio"].as_str().unwrap().to_string())
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate the browser vanishing without a close handshake.
    pub fn disconnect(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClientLink for FakeClient {
    async fn send_text(&self, text: String) -> RelayResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(RelayError::Closed("client socket closed".to_string()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

pub fn relay_settings() -> RelaySettings {
    RelaySettings {
        credentials: Credentials::new("sk-test".to_string()),
        endpoint: Endpoint {
            url: "ws://fake.invalid/v1/realtime".to_string(),
            model: "test-model".to_string(),
            beta_header: "realtime=v1".to_string(),
        },
        turn_detection: TurnDetection {
            kind: "semantic_vad".to_string(),
            eagerness: "low".to_string(),
            create_response: true,
            interrupt_response: true,
        },
        connect_timeout: Duration::from_secs(10),
        idle_timeout: Duration::from_secs(60),
        idle_check_interval: Duration::from_secs(5),
        remote_queue_capacity: 16,
    }
}

/// Poll `cond` until it holds, failing the test after about a second.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// An unregistered session with both legs faked.
pub async fn test_session(id: &str) -> (Arc<Session>, Arc<FakeClient>, Arc<FakeRemote>) {
    let (session, client, remote, _audio) = test_session_with_audio(id).await;
    (session, client, remote)
}

/// Like [`test_session`], also handing back the queue the remote reader feeds.
pub async fn test_session_with_audio(
    id: &str,
) -> (Arc<Session>, Arc<FakeClient>, Arc<FakeRemote>, mpsc::Receiver<String>) {
    let (connector, remote) = FakeConnector::new();
    let (tx, rx) = mpsc::channel(16);
    let transport = RemoteTransport::connect(id, connector, &relay_settings(), tx)
        .await
        .unwrap();
    let client = FakeClient::new();
    let session = Arc::new(Session::new(id.to_string(), client.clone(), transport));
    (session, client, remote, rx)
}
