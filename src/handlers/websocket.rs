use crate::game::manager::{BattleRoyaleManager, JoinSession, LeaveSession, SubmitGuess};
use crate::models::WsMessage;
use actix::prelude::*;
use actix_web::{Error, HttpRequest, HttpResponse, web};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// ハートビート送信間隔
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// この時間応答がなければ切断
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocketアクター
pub struct WsSession {
    /// ハートビート最終時刻
    hb: Instant,
    user_id: String,
    /// 参加中のセッションコード
    code: Option<String>,
    manager: Addr<BattleRoyaleManager>,
    /// マネージャーからの通知受信チャンネル
    rx: Option<mpsc::UnboundedReceiver<WsMessage>>,
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl WsSession {
    pub fn new(user_id: String, manager: Addr<BattleRoyaleManager>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            hb: Instant::now(),
            user_id,
            code: None,
            manager,
            rx: Some(rx),
            tx,
        }
    }

    /// ハートビート送信
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("Heartbeat timed out: user_id={}", act.user_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &WsMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            ctx.text(json);
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, message: impl Into<String>) {
        self.send(
            ctx,
            &WsMessage::Error {
                message: message.into(),
            },
        );
    }

    /// セッション参加処理
    /// 他セッションとの重複はレジストリの所属管理で判定する（終了・削除済みなら参加可）
    fn handle_join(&mut self, code: String, display_name: String, ctx: &mut ws::WebsocketContext<Self>) {
        let msg = JoinSession {
            code,
            user_id: self.user_id.clone(),
            display_name,
            sender: self.tx.clone(),
        };

        // 参加完了までは後続メッセージを処理しない
        ctx.wait(self.manager.send(msg).into_actor(self).map(|res, act, ctx| match res {
            Ok(Ok(view)) => {
                info!("Joined session: code={}, user_id={}", view.code, act.user_id);
                act.code = Some(view.code);
            }
            Ok(Err(e)) => act.send_error(ctx, e.to_string()),
            Err(e) => act.send_error(ctx, format!("Server unavailable: {}", e)),
        }));
    }

    /// 推測送信処理（結果はマネージャーからguess-confirmedで届く）
    fn handle_guess(&mut self, latitude: f64, longitude: f64, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(code) = self.code.clone() else {
            self.send_error(ctx, "Join a session before submitting guesses");
            return;
        };

        let msg = SubmitGuess {
            code,
            user_id: self.user_id.clone(),
            latitude,
            longitude,
        };

        ctx.spawn(self.manager.send(msg).into_actor(self).map(|res, act, ctx| match res {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => act.send_error(ctx, e.to_string()),
            Err(e) => act.send_error(ctx, format!("Server unavailable: {}", e)),
        }));
    }

    fn handle_leave(&mut self) {
        if let Some(code) = self.code.take() {
            self.manager.do_send(LeaveSession {
                code,
                user_id: self.user_id.clone(),
                sender: self.tx.clone(),
            });
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        // マネージャーからの通知をソケットへ流す
        if let Some(rx) = self.rx.take() {
            ctx.add_stream(futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|msg| (msg, rx))
            }));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket closed: user_id={}", self.user_id);
        // 切断は離脱として扱う
        self.handle_leave();
    }
}

impl StreamHandler<WsMessage> for WsSession {
    fn handle(&mut self, msg: WsMessage, ctx: &mut Self::Context) {
        debug!("Sending message to client (user_id={}): {:?}", self.user_id, msg);
        if let WsMessage::SessionEnded { .. } = msg {
            self.code = None;
        }
        self.send(ctx, &msg);
    }

    // 自身が送信側を保持しているため通常は終了しない
    fn finished(&mut self, _ctx: &mut Self::Context) {}
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
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                debug!("Received WebSocket message: {}", text);
                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::JoinSession { code, display_name }) => {
                        self.handle_join(code, display_name, ctx);
                    }
                    Ok(WsMessage::SubmitGuess { latitude, longitude }) => {
                        self.handle_guess(latitude, longitude, ctx);
                    }
                    Ok(WsMessage::LeaveSession) => {
                        self.handle_leave();
                    }
                    Ok(other) => {
                        warn!("Unhandled message type from client: {:?}", other);
                        self.send_error(ctx, "Unsupported message type");
                    }
                    Err(e) => {
                        warn!("Failed to deserialize WsMessage: {}", e);
                        self.send_error(ctx, format!("Invalid message format: {}", text));
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket protocol error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<String>,
}

/// WebSocketエンドポイント
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    manager: web::Data<Addr<BattleRoyaleManager>>,
    query: web::Query<WsQuery>,
) -> Result<HttpResponse, Error> {
    // クエリパラメータからuser_idを取得（なければ生成）
    let user_id = match query.into_inner().user_id {
        Some(user_id) if !user_id.trim().is_empty() => user_id,
        _ => {
            let generated = Uuid::new_v4().to_string();
            info!("Generated user_id={}", generated);
            generated
        }
    };
    info!("WebSocket connection: user_id={}", user_id);

    ws::start(
        WsSession::new(user_id, manager.get_ref().clone()),
        &req,
        stream,
    )
}
