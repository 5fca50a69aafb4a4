use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, warn};
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::validate_jwt;
use crate::chat_server::{ChatServer, Connect, Disconnect, Frame, JoinChat, LeaveChat, RoomBroadcast};
use crate::error::{ApiError, ApiResult};
use crate::models::{PublicUser, User};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// Incoming frames mirror the Socket.IO contract:
/// `{"event": "<name>", "data": <payload>}`.
#[derive(Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

pub struct WsSession {
    session_id: String,
    user: PublicUser,
    hb: Instant,
    addr: Addr<ChatServer>,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                debug!("Websocket heartbeat failed for {}, disconnecting", act.user.user_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// `join_chat`/`leave_chat` carry the chat id either as a bare string
    /// or wrapped in `{chatId}`.
    fn chat_id_of(data: &Value) -> Option<String> {
        data.as_str()
            .map(|s| s.to_string())
            .or_else(|| data.get("chatId").and_then(|v| v.as_str()).map(|s| s.to_string()))
    }

    fn dispatch(&self, frame: ClientFrame) {
        match frame.event.as_str() {
            "join_chat" => {
                if let Some(chat_id) = Self::chat_id_of(&frame.data) {
                    self.addr.do_send(JoinChat {
                        session_id: self.session_id.clone(),
                        chat_id,
                    });
                }
            }
            "leave_chat" => {
                if let Some(chat_id) = Self::chat_id_of(&frame.data) {
                    self.addr.do_send(LeaveChat {
                        session_id: self.session_id.clone(),
                        chat_id,
                    });
                }
            }
            // Live-update broadcast only; persistence is the HTTP path.
            "send_message" => {
                if let Some(chat_id) = Self::chat_id_of(&frame.data) {
                    let message = frame.data.get("message").cloned().unwrap_or(Value::Null);
                    self.addr.do_send(RoomBroadcast {
                        chat_id: chat_id.clone(),
                        event: "new_message".to_string(),
                        payload: serde_json::json!({
                            "chatId": chat_id,
                            "message": message,
                            "sender": self.user,
                        }),
                        skip_session: Some(self.session_id.clone()),
                        skip_user: None,
                    });
                }
            }
            "typing_start" => {
                if let Some(chat_id) = Self::chat_id_of(&frame.data) {
                    self.addr.do_send(RoomBroadcast {
                        chat_id: chat_id.clone(),
                        event: "user_typing".to_string(),
                        payload: serde_json::json!({
                            "chatId": chat_id,
                            "userId": self.user.user_id,
                        }),
                        skip_session: Some(self.session_id.clone()),
                        skip_user: None,
                    });
                }
            }
            "typing_stop" => {
                if let Some(chat_id) = Self::chat_id_of(&frame.data) {
                    self.addr.do_send(RoomBroadcast {
                        chat_id: chat_id.clone(),
                        event: "user_stop_typing".to_string(),
                        payload: serde_json::json!({
                            "chatId": chat_id,
                            "userId": self.user.user_id,
                        }),
                        skip_session: Some(self.session_id.clone()),
                        skip_user: None,
                    });
                }
            }
            "message_read" => {
                if let Some(chat_id) = Self::chat_id_of(&frame.data) {
                    let message_id = frame
                        .data
                        .get("messageId")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    self.addr.do_send(RoomBroadcast {
                        chat_id: chat_id.clone(),
                        event: "message_read_receipt".to_string(),
                        payload: serde_json::json!({
                            "chatId": chat_id,
                            "messageId": message_id,
                            "userId": self.user.user_id,
                        }),
                        skip_session: Some(self.session_id.clone()),
                        skip_user: None,
                    });
                }
            }
            other => debug!("Unknown websocket event: {}", other),
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        self.addr.do_send(Connect {
            session_id: self.session_id.clone(),
            user: self.user.clone(),
            addr: ctx.address().recipient(),
        });
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        self.addr.do_send(Disconnect {
            session_id: self.session_id.clone(),
            user_id: self.user.user_id.clone(),
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => self.dispatch(frame),
                Err(e) => debug!("Unparseable websocket frame: {}", e),
            },
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("Websocket error for {}: {}", self.user.user_id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<Frame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Frame, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.text(msg.0);
    }
}

/// GET /ws?token=<jwt>
/// The handshake carries the bearer token in the query string; the
/// upgrade is rejected when it does not verify or the user is gone.
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    query: web::Query<WsQuery>,
) -> ApiResult<HttpResponse> {
    let claims = validate_jwt(&query.token, &data.config.jwt_secret)
        .map_err(|_| ApiError::unauthorized("Invalid token"))?;

    let users = data.mongodb.db.collection::<User>("users");
    let user = match users.find_one(doc! { "_id": &claims.sub }).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(ApiError::unauthorized("Unknown user")),
        Err(e) => return Err(ApiError::internal("fetching user for handshake", e)),
    };

    let session = WsSession {
        session_id: Uuid::new_v4().to_string(),
        user: PublicUser::from(&user),
        hb: Instant::now(),
        addr: data.chat_server.clone(),
    };
    ws::start(session, &req, stream).map_err(|e| ApiError::internal("websocket upgrade", e))
}
