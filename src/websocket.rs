//! # Browser WebSocket Endpoint
//!
//! Browsers connect to `/ws/audio`. Each connection becomes one relay session.
//!
//! ## Structure:
//! - **`ClientSocket`** actor: owns the socket. Text frames are forwarded, in
//!   arrival order, onto a bounded channel consumed by the session's event
//!   bridge. When that channel is full the actor stops reading until there
//!   is room. A close, protocol error or missed heartbeat stops the actor,
//!   which reports `ClientFrame::Closed`.
//! - **`ActorClientLink`**: the session's handle for writing to the socket,
//!   implemented as messages to the actor.
//!
//! ## Message Format:
//! See `session::messages`. Binary frames are not part of the protocol and
//! are ignored.

use crate::error::{RelayError, RelayResult};
use crate::session::{ClientFrame, ClientLink};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Actor owning one browser socket.
pub struct ClientSocket {
    inbound: mpsc::Sender<ClientFrame>,
    last_heartbeat: Instant,
}

impl ClientSocket {
    pub fn new(inbound: mpsc::Sender<ClientFrame>) -> Self {
        Self {
            inbound,
            last_heartbeat: Instant::now(),
        }
    }

    /// Queue one frame for the bridge. A full queue pauses the actor until
    /// the bridge catches up, so frames are neither dropped nor reordered.
    fn forward(&mut self, text: String, ctx: &mut ws::WebsocketContext<Self>) {
        let frame = match self.inbound.try_send(ClientFrame::Text(text)) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(frame)) => frame,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Session no longer reading client messages, closing socket");
                ctx.stop();
                return;
            }
        };

        debug!("Client message queue full, pausing socket reads");
        let inbound = self.inbound.clone();
        ctx.wait(async move { inbound.send(frame).await }.into_actor(self).map(
            |result, _act, ctx| {
                if result.is_err() {
                    debug!("Session no longer reading client messages, closing socket");
                    ctx.stop();
                }
            },
        ));
    }
}

/// Write one text frame to the browser.
#[derive(Message)]
#[rtype(result = "()")]
struct SendText(String);

/// Close the browser socket normally.
#[derive(Message)]
#[rtype(result = "()")]
struct CloseSocket;

impl Actor for ClientSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket connection stopped");
        // If the queue is full the session still sees the channel close once this actor drops
        let _ = self.inbound.try_send(ClientFrame::Closed);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.forward(text.to_string(), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                warn!(bytes = data.len(), "Ignoring binary frame from client");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<SendText> for ClientSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<CloseSocket> for ClientSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseSocket, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Normal)));
        ctx.stop();
    }
}

/// Session-side handle for the browser socket.
pub struct ActorClientLink {
    addr: Addr<ClientSocket>,
}

impl ActorClientLink {
    pub fn new(addr: Addr<ClientSocket>) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl ClientLink for ActorClientLink {
    async fn send_text(&self, text: String) -> RelayResult<()> {
        if !self.addr.connected() {
            return Err(RelayError::Closed("client socket closed".to_string()));
        }
        self.addr.do_send(SendText(text));
        Ok(())
    }

    async fn close(&self) {
        if self.addr.connected() {
            self.addr.do_send(CloseSocket);
        }
    }
}

/// WebSocket endpoint handler.
///
/// Upgrades the request, then hands the connection to the session lifecycle,
/// which runs it to completion on its own task.
pub async fn audio_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    let capacity = app_state.get_config().session.client_queue_capacity;
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

    let (addr, response) = ws::WsResponseBuilder::new(ClientSocket::new(inbound_tx), &req, stream).start_with_addr()?;

    let client: Arc<dyn ClientLink> = Arc::new(ActorClientLink::new(addr));
    let lifecycle = app_state.lifecycle.clone();
    actix_web::rt::spawn(async move { lifecycle.run(client, inbound_rx).await });

    Ok(response)
}
