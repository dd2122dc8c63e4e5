//! WebSocket bridge between client sockets and room session actors.
//!
//! Each socket is one actix actor. Inbound text frames are forwarded to the
//! room actor as events; outbound commands from the room actor are drained
//! into the socket. The bridge never interprets payloads — protocol
//! decisions (including rejecting malformed frames) belong to the room.

use crate::rest::AppState;
use crate::room::{ConnId, Outbound, RoomEvent};
use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use battleroom_protocol::RoomId;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket actor for one client connection to a battle room.
pub struct BattleWsActor {
    room_id: RoomId,
    conn: ConnId,
    /// Send events to the room actor.
    event_tx: mpsc::Sender<RoomEvent>,
    /// Receive outbound commands from the room actor.
    outbound_rx: Option<mpsc::Receiver<Outbound>>,
    last_heartbeat: Instant,
}

/// Message type forwarding room actor commands to the socket.
#[derive(Message)]
#[rtype(result = "()")]
struct RoomCommand(Outbound);

impl BattleWsActor {
    pub fn new(
        room_id: RoomId,
        conn: ConnId,
        event_tx: mpsc::Sender<RoomEvent>,
        outbound_rx: mpsc::Receiver<Outbound>,
    ) -> Self {
        Self {
            room_id,
            conn,
            event_tx,
            outbound_rx: Some(outbound_rx),
            last_heartbeat: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                tracing::debug!(room = %act.room_id, conn = act.conn, "client heartbeat timeout");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn start_outbound_drain(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(mut outbound_rx) = self.outbound_rx.take() {
            let addr = ctx.address();
            actix::spawn(async move {
                while let Some(command) = outbound_rx.recv().await {
                    if addr.try_send(RoomCommand(command)).is_err() {
                        break;
                    }
                }
            });
        }
    }
}

impl Actor for BattleWsActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);
        self.start_outbound_drain(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let conn = self.conn;
        let event_tx = self.event_tx.clone();
        actix::spawn(async move {
            let _ = event_tx.send(RoomEvent::Disconnected { conn }).await;
        });
    }
}

impl Handler<RoomCommand> for BattleWsActor {
    type Result = ();

    fn handle(&mut self, msg: RoomCommand, ctx: &mut Self::Context) {
        match msg.0 {
            Outbound::Frame(text) => ctx.text(text),
            Outbound::Reject => {
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Unsupported,
                    description: Some("malformed message".into()),
                }));
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for BattleWsActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                let conn = self.conn;
                let event_tx = self.event_tx.clone();
                let text = text.to_string();
                actix::spawn(async move {
                    let _ = event_tx.send(RoomEvent::Frame { conn, text }).await;
                });
            }
            Ok(ws::Message::Binary(_)) => {
                // The protocol is JSON text frames only.
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Unsupported,
                    description: Some("binary frames not supported".into()),
                }));
                ctx.stop();
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(room = %self.room_id, conn = self.conn, ?reason, "client closed");
                ctx.stop();
            }
            Err(error) => {
                tracing::debug!(room = %self.room_id, conn = self.conn, %error, "socket error");
                ctx.stop();
            }
            _ => (),
        }
    }
}

/// HTTP handler upgrading `GET /api/play/{room_id}` to a room WebSocket.
pub async fn battle_ws(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let room_id = RoomId::new(path.into_inner());
    tracing::info!(room = %room_id, "WebSocket connection");

    let connection = state.room_manager.connect(room_id.clone()).await;
    let (conn, event_tx, outbound_rx) = connection.into_parts();

    let actor = BattleWsActor::new(room_id, conn, event_tx, outbound_rx);
    ws::start(actor, &req, stream)
}
