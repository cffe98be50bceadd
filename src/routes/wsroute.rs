use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::state::AppState;
use crate::websocket::events::{WsInboundEvent, WsOutboundEvent};
use crate::websocket::ConnectionId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

// Message type for delivering serialized events to the WebSocket actor
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct OutboundText(String);

// WebSocket session actor
//
// Inbound events are fed through a single ordered queue per connection, so
// events from one client dispatch strictly in arrival order while different
// connections interleave freely at storage suspension points.
pub struct WsSession {
    connection_id: ConnectionId,
    app_state: AppState,
    hb: Instant,
    outbound_rx: Option<UnboundedReceiver<String>>,
    inbound_tx: Option<UnboundedSender<WsInboundEvent>>,
}

impl WsSession {
    fn new(
        connection_id: ConnectionId,
        app_state: AppState,
        outbound_rx: UnboundedReceiver<String>,
    ) -> Self {
        Self {
            connection_id,
            app_state,
            hb: Instant::now(),
            outbound_rx: Some(outbound_rx),
            inbound_tx: None,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(
                    connection_id = %act.connection_id,
                    "websocket heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn touch(&self) {
        let registry = self.app_state.registry.clone();
        let connection_id = self.connection_id;
        actix::spawn(async move {
            registry.touch(connection_id).await;
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "websocket connection opened");

        self.hb(ctx);

        // Forward room broadcasts from the registry to this socket.
        if let Some(mut rx) = self.outbound_rx.take() {
            let addr = ctx.address();
            actix::spawn(async move {
                while let Some(text) = rx.recv().await {
                    addr.do_send(OutboundText(text));
                }
            });
        }

        // Drain inbound events in arrival order; the acknowledgement goes
        // back to this connection only.
        let (tx, mut rx) = unbounded_channel();
        self.inbound_tx = Some(tx);

        let router = self.app_state.router.clone();
        let connection_id = self.connection_id;
        let addr = ctx.address();
        actix::spawn(async move {
            while let Some(event) = rx.recv().await {
                let ack = router.handle_event(connection_id, event).await;
                match ack.to_json() {
                    Ok(body) => addr.do_send(OutboundText(body)),
                    Err(error) => tracing::error!(
                        connection_id = %connection_id,
                        %error,
                        "failed to serialize acknowledgement"
                    ),
                }
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "websocket connection closed");

        self.inbound_tx = None;

        let router = self.app_state.router.clone();
        let connection_id = self.connection_id;
        actix::spawn(async move {
            router.handle_disconnect(connection_id).await;
        });
    }
}

impl Handler<OutboundText> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                self.touch();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
                self.touch();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.touch();

                match serde_json::from_str::<WsInboundEvent>(&text) {
                    Ok(event) => {
                        if let Some(tx) = &self.inbound_tx {
                            if tx.send(event).is_err() {
                                tracing::error!(
                                    connection_id = %self.connection_id,
                                    "inbound queue closed, dropping event"
                                );
                            }
                        }
                    }
                    Err(error) => {
                        // Rejected before any state mutation.
                        tracing::warn!(
                            connection_id = %self.connection_id,
                            %error,
                            "malformed event payload"
                        );
                        let ack = WsOutboundEvent::ack_failure(
                            "unknown",
                            format!("invalid event payload: {error}"),
                        );
                        if let Ok(body) = ack.to_json() {
                            ctx.text(body);
                        }
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    "binary websocket messages not supported"
                );
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    ?reason,
                    "websocket close received"
                );
                ctx.stop();
            }
            _ => {}
        }
    }
}

// HTTP handler: anonymous connect, registry entry created up front so room
// broadcasts can reach this socket from the first event on.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (connection_id, outbound_rx) = state.registry.register().await;
    let session = WsSession::new(connection_id, state.get_ref().clone(), outbound_rx);
    ws::start(session, &req, stream)
}
