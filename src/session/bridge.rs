//! # Event Bridge
//!
//! The per-session relay loop. It races three sources:
//! - client frames (audio in, end-session requests, socket close)
//! - audio increments queued by the remote reader worker
//! - the session's closing signal, so teardown started elsewhere ends the loop
//!
//! Each direction preserves order: audio chunks reach the remote leg in the
//! order the client sent them, and remote increments reach the client in the
//! order the remote produced them. Nothing is reordered or merged.

use crate::audio::encode_for_transport;
use crate::session::messages::{ClientRequest, ServerMessage};
use crate::session::{ClientFrame, Session};

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Why the bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    ClientDisconnected,
    EndRequested,
    /// Teardown was started by another trigger
    Terminated,
}

pub struct EventBridge {
    session: Arc<Session>,
}

impl EventBridge {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Relay until the client leaves, asks to end, or the session is torn down.
    ///
    /// The caller owns teardown; the bridge only reports why it stopped.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<ClientFrame>,
        mut remote_audio: mpsc::Receiver<String>,
    ) -> BridgeExit {
        let mut closing = self.session.closing_signal();
        if *closing.borrow_and_update() {
            return BridgeExit::Terminated;
        }

        loop {
            tokio::select! {
                biased;

                // The signal only ever flips once, to true
                _ = closing.changed() => return BridgeExit::Terminated,

                frame = inbound.recv() => match frame {
                    Some(ClientFrame::Text(text)) => {
                        if let Some(exit) = self.on_client_text(&text).await {
                            return exit;
                        }
                    }
                    Some(ClientFrame::Closed) | None => {
                        debug!(session_id = %self.session.id(), "Client leg closed");
                        return BridgeExit::ClientDisconnected;
                    }
                },

                Some(delta) = remote_audio.recv() => self.on_remote_audio(delta).await,
            }
        }
    }

    async fn on_client_text(&self, text: &str) -> Option<BridgeExit> {
        match ClientRequest::parse(text) {
            Ok(ClientRequest::Audio(samples)) => {
                self.forward_client_audio(&samples).await;
                None
            }
            Ok(ClientRequest::EndSession) => {
                debug!(session_id = %self.session.id(), "Client requested end of session");
                Some(BridgeExit::EndRequested)
            }
            Err(e) => {
                warn!(session_id = %self.session.id(), error = %e, "Dropping client message");
                None
            }
        }
    }

    /// Encode one client chunk and hand it to the remote leg.
    ///
    /// At most one reconnect happens per chunk. If the link cannot be brought
    /// back, the chunk is dropped and the session carries on.
    async fn forward_client_audio(&self, samples: &[f32]) {
        self.session.touch();
        if samples.is_empty() {
            trace!(session_id = %self.session.id(), "Skipping empty audio chunk");
            return;
        }

        let payload = encode_for_transport(samples);
        let remote = self.session.remote();

        let reconnected = match remote.ensure_connected().await {
            Ok(reconnected) => reconnected,
            Err(e) => {
                warn!(session_id = %self.session.id(), error = %e, "Remote leg unavailable, dropping audio chunk");
                return;
            }
        };

        let Err(e) = remote.send_audio(payload.clone()).await else {
            return;
        };
        if reconnected {
            warn!(session_id = %self.session.id(), error = %e, "Send failed on fresh connection, dropping audio chunk");
            return;
        }

        debug!(session_id = %self.session.id(), error = %e, "Send failed, reconnecting once");
        match remote.ensure_connected().await {
            Ok(_) => {
                if let Err(e) = remote.send_audio(payload).await {
                    warn!(session_id = %self.session.id(), error = %e, "Retry failed, dropping audio chunk");
                }
            }
            Err(e) => {
                warn!(session_id = %self.session.id(), error = %e, "Reconnect failed, dropping audio chunk");
            }
        }
    }

    async fn on_remote_audio(&self, delta: String) {
        self.session.touch();
        let message = match (ServerMessage::AudioChunk { audio: delta }).to_json() {
            Ok(message) => message,
            Err(e) => {
                warn!(session_id = %self.session.id(), error = %e, "Could not encode audio chunk");
                return;
            }
        };
        if let Err(e) = self.session.client().send_text(message).await {
            // The client close frame will follow and end the loop
            debug!(session_id = %self.session.id(), error = %e, "Audio chunk not delivered to client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{test_session_with_audio, wait_until};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn audio_message(samples: &[f32]) -> ClientFrame {
        ClientFrame::Text(json!({ "audio": samples }).to_string())
    }

    #[tokio::test]
    async fn test_client_audio_reaches_remote_in_order() {
        let (session, _client, remote, audio_rx) = test_session_with_audio("s1").await;
        let (tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn(async move { EventBridge::new(session).run(rx, audio_rx).await });

        let chunks: [&[f32]; 3] = [&[0.1, 0.2], &[-0.5], &[1.0, -1.0, 0.0]];
        for chunk in chunks {
            tx.send(audio_message(chunk)).await.unwrap();
        }
        tx.send(ClientFrame::Closed).await.unwrap();

        assert_eq!(bridge.await.unwrap(), BridgeExit::ClientDisconnected);
        let expected: Vec<String> = chunks.iter().map(|c| encode_for_transport(c)).collect();
        assert_eq!(remote.appended_audio(), expected);
    }

    #[tokio::test]
    async fn test_remote_audio_reaches_client_in_order() {
        let (session, client, remote, audio_rx) = test_session_with_audio("s1").await;
        let (tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn(async move { EventBridge::new(session).run(rx, audio_rx).await });

        remote.push_event(json!({"type": "response.created"}));
        remote.push_event(json!({"type": "response.audio.delta", "delta": "X"}));
        remote.push_event(json!({"type": "response.text.delta", "delta": "nope"}));
        remote.push_event(json!({"type": "response.audio.delta", "delta": "Y"}));

        wait_until(|| client.audio_chunks().len() == 2).await;
        assert_eq!(client.audio_chunks(), vec!["X".to_string(), "Y".to_string()]);

        drop(tx);
        assert_eq!(bridge.await.unwrap(), BridgeExit::ClientDisconnected);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let (session, _client, remote, audio_rx) = test_session_with_audio("s1").await;
        let (tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn(async move { EventBridge::new(session).run(rx, audio_rx).await });

        tx.send(ClientFrame::Text("{not json".to_string())).await.unwrap();
        tx.send(ClientFrame::Text(r#"{"type":"ping"}"#.to_string())).await.unwrap();
        tx.send(audio_message(&[0.5])).await.unwrap();
        tx.send(ClientFrame::Text(r#"{"type":"end_session"}"#.to_string())).await.unwrap();

        assert_eq!(bridge.await.unwrap(), BridgeExit::EndRequested);
        assert_eq!(remote.appended_audio(), vec![encode_for_transport(&[0.5])]);
    }

    #[tokio::test]
    async fn test_empty_chunk_counts_as_activity_but_is_not_sent() {
        let (session, _client, remote, audio_rx) = test_session_with_audio("s1").await;
        let before = session.last_activity();
        let (tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn({
            let session = session.clone();
            async move { EventBridge::new(session).run(rx, audio_rx).await }
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        tx.send(audio_message(&[])).await.unwrap();
        tx.send(ClientFrame::Closed).await.unwrap();
        bridge.await.unwrap();

        assert!(session.last_activity() > before);
        assert!(remote.appended_audio().is_empty());
    }

    #[tokio::test]
    async fn test_reconnects_after_remote_drop() {
        let (session, _client, remote, audio_rx) = test_session_with_audio("s1").await;
        let (tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn({
            let session = session.clone();
            async move { EventBridge::new(session).run(rx, audio_rx).await }
        });

        tx.send(audio_message(&[0.1])).await.unwrap();
        wait_until(|| remote.appended_audio().len() == 1).await;

        remote.drop_connection();
        let mut disconnected = false;
        for _ in 0..200 {
            if !session.remote().is_connected().await {
                disconnected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(disconnected);

        tx.send(audio_message(&[0.2])).await.unwrap();
        wait_until(|| remote.appended_audio().len() == 2).await;

        assert_eq!(remote.connect_count(), 2);
        // Configuration goes out again on the new connection, before the audio
        let kinds: Vec<String> = remote.sent().iter().map(|e| e["type"].as_str().unwrap().to_string()).collect();
        assert_eq!(
            kinds,
            vec![
                "session.update",
                "input_audio_buffer.append",
                "session.update",
                "input_audio_buffer.append"
            ]
        );

        drop(tx);
        bridge.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_reconnect_keeps_session_alive() {
        let (session, _client, remote, audio_rx) = test_session_with_audio("s1").await;
        let (tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn({
            let session = session.clone();
            async move { EventBridge::new(session).run(rx, audio_rx).await }
        });

        remote.drop_connection();
        remote.fail_connect.store(true, Ordering::SeqCst);
        let mut disconnected = false;
        for _ in 0..200 {
            if !session.remote().is_connected().await {
                disconnected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(disconnected);

        // Dropped: exactly one reconnect attempt for this chunk
        tx.send(audio_message(&[0.3])).await.unwrap();
        wait_until(|| remote.connect_count() == 2).await;
        assert!(remote.appended_audio().is_empty());

        // The service comes back and the next chunk goes through
        remote.fail_connect.store(false, Ordering::SeqCst);
        tx.send(audio_message(&[0.4])).await.unwrap();
        wait_until(|| remote.appended_audio().len() == 1).await;

        assert_eq!(remote.connect_count(), 3);
        assert_eq!(remote.appended_audio(), vec![encode_for_transport(&[0.4])]);
        assert!(!bridge.is_finished());

        drop(tx);
        assert_eq!(bridge.await.unwrap(), BridgeExit::ClientDisconnected);
    }

    #[tokio::test]
    async fn test_send_failure_is_retried_once_after_reconnect() {
        let (session, _client, remote, audio_rx) = test_session_with_audio("s1").await;
        let (tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn(async move { EventBridge::new(session).run(rx, audio_rx).await });

        remote.fail_next_send.store(true, Ordering::SeqCst);
        tx.send(audio_message(&[0.7])).await.unwrap();
        tx.send(ClientFrame::Closed).await.unwrap();
        bridge.await.unwrap();

        assert_eq!(remote.connect_count(), 2);
        assert_eq!(remote.appended_audio(), vec![encode_for_transport(&[0.7])]);
    }

    #[tokio::test]
    async fn test_stops_when_session_closes_elsewhere() {
        let (session, _client, _remote, audio_rx) = test_session_with_audio("s1").await;
        let (_tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn({
            let session = session.clone();
            async move { EventBridge::new(session).run(rx, audio_rx).await }
        });

        assert!(session.begin_closing());
        let exit = tokio::time::timeout(Duration::from_secs(1), bridge).await.unwrap().unwrap();
        assert_eq!(exit, BridgeExit::Terminated);
    }

    #[tokio::test]
    async fn test_interleaved_directions_keep_their_order() {
        let (session, client, remote, audio_rx) = test_session_with_audio("s1").await;
        let (tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn(async move { EventBridge::new(session).run(rx, audio_rx).await });

        let chunks: [&[f32]; 3] = [&[0.1], &[0.2, -0.2], &[0.3]];
        let deltas = ["X", "Y", "Z"];
        for (chunk, delta) in chunks.iter().zip(deltas) {
            remote.push_event(json!({"type": "response.audio.delta", "delta": delta}));
            tx.send(audio_message(chunk)).await.unwrap();
        }

        wait_until(|| remote.appended_audio().len() == 3 && client.audio_chunks().len() == 3).await;
        let expected: Vec<String> = chunks.iter().map(|c| encode_for_transport(c)).collect();
        assert_eq!(remote.appended_audio(), expected);
        assert_eq!(client.audio_chunks(), deltas.map(String::from).to_vec());

        drop(tx);
        assert_eq!(bridge.await.unwrap(), BridgeExit::ClientDisconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_reconnect_drops_only_the_stalled_chunk() {
        let (session, _client, remote, audio_rx) = test_session_with_audio("s1").await;
        let (tx, rx) = mpsc::channel(8);
        let bridge = tokio::spawn({
            let session = session.clone();
            async move { EventBridge::new(session).run(rx, audio_rx).await }
        });

        remote.drop_connection();
        for _ in 0..200 {
            if !session.remote().is_connected().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The service accepts the socket but never answers
        remote.connect_delay_ms.store(60_000, Ordering::SeqCst);
        let started = tokio::time::Instant::now();
        tx.send(audio_message(&[0.5])).await.unwrap();
        wait_until(|| remote.connect_count() == 2).await;

        remote.connect_delay_ms.store(0, Ordering::SeqCst);
        tx.send(audio_message(&[0.6])).await.unwrap();
        for _ in 0..100 {
            if remote.appended_audio().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        assert_eq!(remote.appended_audio(), vec![encode_for_transport(&[0.6])]);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(remote.connect_count(), 3);

        drop(tx);
        assert_eq!(bridge.await.unwrap(), BridgeExit::ClientDisconnected);
    }
}
