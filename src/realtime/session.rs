//! WebSocket 会话管理
//!
//! 会话在路由层完成握手校验后创建，Actor 启动时注册到
//! 会话注册表，停止时注销。注册表通过 crossbeam 通道向
//! 会话投递消息，会话以固定间隔批量转发到客户端。

use super::messages::{ClientMessage, ServerMessage};
use super::registry::SessionRegistry;
use crate::notification::{DeliveryOutcome, DeliveryTracker};
use crate::preference::PreferenceStore;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 心跳间隔
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// 客户端超时时间
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
/// 出站消息轮询间隔
const OUTBOX_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 会话角色（由 JWT role 声明决定）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// 普通用户：注册到 用户ID → 连接 表
    User,
    /// 管理观察者：注册到 连接ID → 连接 表
    Observer,
}

/// WebSocket 会话
pub struct WsSession {
    /// 会话 ID
    pub id: String,

    /// 已认证的用户 ID（握手阶段校验）
    pub user_id: String,

    /// 会话角色
    pub role: SessionRole,

    /// 最后心跳时间
    heartbeat: Instant,

    /// 会话注册表
    registry: Arc<SessionRegistry>,

    /// 投递追踪器（mark_read 转发）
    tracker: Arc<DeliveryTracker>,

    /// 偏好仓储（preference_update 转发）
    preferences: Arc<dyn PreferenceStore>,

    /// 注册表 → 会话 的消息通道
    outbox_tx: Sender<ServerMessage>,
    outbox_rx: Receiver<ServerMessage>,
}

impl WsSession {
    pub fn new(
        session_id: String,
        user_id: String,
        role: SessionRole,
        registry: Arc<SessionRegistry>,
        tracker: Arc<DeliveryTracker>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let (outbox_tx, outbox_rx) = unbounded();
        Self {
            id: session_id,
            user_id,
            role,
            heartbeat: Instant::now(),
            registry,
            tracker,
            preferences,
            outbox_tx,
            outbox_rx,
        }
    }

    /// 启动心跳检查
    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.heartbeat) > CLIENT_TIMEOUT {
                log::warn!("WebSocket session {} timed out, disconnecting", act.id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// 启动出站消息监听（注册表 → 客户端）
    fn start_outbox_listener(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let receiver = self.outbox_rx.clone();
        ctx.run_interval(OUTBOX_POLL_INTERVAL, move |_act, ctx| {
            while let Ok(message) = receiver.try_recv() {
                match serde_json::to_string(&message) {
                    Ok(json) => ctx.text(json),
                    Err(e) => log::error!("Failed to serialize server message: {}", e),
                }
            }
        });
    }

    /// 处理客户端控制消息
    fn handle_client_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg {
            ClientMessage::Ping => {
                self.send_message(ServerMessage::pong(), ctx);
            }

            ClientMessage::MarkRead { notification_id } => {
                // 转发到投递追踪器的 READ 迁移
                if let Err(e) = self
                    .tracker
                    .record_outcome(&notification_id, DeliveryOutcome::Read)
                {
                    log::warn!(
                        "mark_read failed for {} (session {}): {}",
                        notification_id,
                        self.id,
                        e
                    );
                    self.send_message(
                        ServerMessage::Error {
                            code: 404,
                            message: format!("mark_read failed: {}", e),
                        },
                        ctx,
                    );
                }
            }

            ClientMessage::PreferenceUpdate { update } => {
                // 转发到偏好仓储，本层不处理
                self.preferences.apply_update(&self.user_id, update);
                log::debug!("Preference update forwarded for user {}", self.user_id);
            }
        }
    }

    /// 发送服务端消息
    fn send_message(&self, msg: ServerMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if let Ok(json) = serde_json::to_string(&msg) {
            ctx.text(json);
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!(
            "WebSocket session {} started for user {} ({:?})",
            self.id,
            self.user_id,
            self.role
        );

        match self.role {
            SessionRole::User => {
                self.registry.register_user(
                    self.user_id.clone(),
                    self.id.clone(),
                    self.outbox_tx.clone(),
                );
            }
            SessionRole::Observer => {
                self.registry.register_observer(
                    self.id.clone(),
                    self.user_id.clone(),
                    self.outbox_tx.clone(),
                );
            }
        }

        self.send_message(
            ServerMessage::welcome(serde_json::json!({
                "session_id": self.id,
                "user_id": self.user_id,
            })),
            ctx,
        );

        self.start_heartbeat(ctx);
        self.start_outbox_listener(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::info!("WebSocket session {} stopped", self.id);
        self.registry.unregister(&self.id);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.heartbeat = Instant::now();

                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => self.handle_client_message(client_msg, ctx),
                    Err(e) => {
                        log::warn!("Failed to parse client message on session {}: {}", self.id, e);
                        self.send_message(
                            ServerMessage::Error {
                                code: 400,
                                message: format!("Invalid message format: {}", e),
                            },
                            ctx,
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                log::warn!("Binary messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                log::info!("WebSocket session {} closed: {:?}", self.id, reason);
                ctx.stop();
            }
            _ => {}
        }
    }
}
