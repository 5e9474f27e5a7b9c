//! In-memory remote speech service for tests.

use crate::error::{RelayError, RelayResult};
use crate::realtime::transport::{
    Credentials, Endpoint, RemoteConnection, RemoteConnector, RemoteSink, RemoteStream,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared record of everything the relay did to the fake service.
#[derive(Default)]
pub struct FakeRemote {
    pub fail_connect: AtomicBool,
    pub fail_next_send: AtomicBool,
    /// How long each dial hangs before answering.
    pub connect_delay_ms: AtomicU64,
    connects: AtomicUsize,
    sink_closes: AtomicUsize,
    sent: Mutex<Vec<String>>,
    feeds: Mutex<Vec<mpsc::UnboundedSender<RelayResult<String>>>>,
}

impl FakeRemote {
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sink_close_count(&self) -> usize {
        self.sink_closes.load(Ordering::SeqCst)
    }

    /// Every frame written, across all connections, parsed as JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn sent_of_type(&self, kind: &str) -> Vec<Value> {
        self.sent().into_iter().filter(|event| event["type"] == kind).collect()
    }

    /// Audio payloads of the append events, in send order.
    pub fn appended_audio(&self) -> Vec<String> {
        self.sent_of_type("input_audio_buffer.append")
            .into_iter()
            .map(|event| event["audio"].as_str().unwrap().to_string())
            .collect()
    }

    /// Deliver an event on the most recent connection.
    pub fn push_event(&self, event: Value) {
        self.push_raw(&event.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        if let Some(feed) = self.feeds.lock().unwrap().last() {
            let _ = feed.send(Ok(text.to_string()));
        }
    }

    /// Simulate the service hanging up on every open connection.
    pub fn drop_connection(&self) {
        self.feeds.lock().unwrap().clear();
    }
}

pub struct FakeConnector(Arc<FakeRemote>);

impl FakeConnector {
    pub fn new() -> (Arc<dyn RemoteConnector>, Arc<FakeRemote>) {
        let remote = Arc::new(FakeRemote::default());
        (Arc::new(FakeConnector(remote.clone())), remote)
    }
}

#[async_trait]
impl RemoteConnector for FakeConnector {
    async fn connect(&self, _credentials: &Credentials, _endpoint: &Endpoint) -> RelayResult<RemoteConnection> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        let delay = self.0.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.0.fail_connect.load(Ordering::SeqCst) {
            return Err(RelayError::Connect("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.0.feeds.lock().unwrap().push(tx);
        Ok(RemoteConnection {
            sink: Box::new(FakeSink(self.0.clone())),
            stream: Box::new(FakeStream(rx)),
        })
    }
}

struct FakeSink(Arc<FakeRemote>);

#[async_trait]
impl RemoteSink for FakeSink {
    async fn send_text(&mut self, text: String) -> RelayResult<()> {
        if self.0.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(RelayError::TransientSend("broken pipe".to_string()));
        }
        self.0.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.0.sink_closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeStream(mpsc::UnboundedReceiver<RelayResult<String>>);

#[async_trait]
impl RemoteStream for FakeStream {
    async fn next_text(&mut self) -> Option<RelayResult<String>> {
        self.0.recv().await
    }
}
