//! WebSocket 服务模块
//!
//! 握手要求：查询参数携带 user_id 与 token，凭证在连接
//! 注册之前完成校验；二者任一缺失或无效即拒绝。role 声明
//! 决定注册为用户会话还是观察者会话。
//!
//! 路由: `/ws?user_id=<USER_ID>&token=<JWT>`

use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::sync::Arc;
use uuid::Uuid;

use crate::notification::DeliveryTracker;
use crate::preference::PreferenceStore;
use crate::realtime::{SessionRegistry, SessionRole, WsSession};
use crate::utils::jwt::{self, SecurityError, Severity};

/// WebSocket 服务器
pub struct WebSocketServer {
    registry: Arc<SessionRegistry>,
    tracker: Arc<DeliveryTracker>,
    preferences: Arc<dyn PreferenceStore>,
}

impl WebSocketServer {
    pub fn new(
        registry: Arc<SessionRegistry>,
        tracker: Arc<DeliveryTracker>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            registry,
            tracker,
            preferences,
        }
    }

    /// 处理 WebSocket 连接（握手校验在前）
    pub async fn handle_connection(
        &self,
        req: HttpRequest,
        stream: web::Payload,
    ) -> Result<HttpResponse, Error> {
        let user_id = query_param(&req, "user_id");
        let token = query_param(&req, "token");

        let claims = match jwt::authenticate_handshake(user_id.as_deref(), token.as_deref()) {
            Ok(claims) => claims,
            Err(e) => return Ok(reject_handshake(e)),
        };

        let role = if claims.is_observer() {
            SessionRole::Observer
        } else {
            SessionRole::User
        };

        let session_id = Uuid::new_v4().to_string();
        let session = WsSession::new(
            session_id,
            claims.sub,
            role,
            self.registry.clone(),
            self.tracker.clone(),
            self.preferences.clone(),
        );

        // 会话在 Actor::started() 中自动注册
        let resp = ws::start(session, &req, stream)?;
        Ok(resp)
    }
}

/// 安全错误 → 传输层响应（穷尽匹配）
fn reject_handshake(error: SecurityError) -> HttpResponse {
    match error.severity() {
        Severity::Low => log::debug!("WebSocket handshake rejected: {}", error),
        Severity::Medium => log::info!("WebSocket handshake rejected: {}", error),
        Severity::High => log::warn!("WebSocket handshake rejected: {}", error),
    }

    let body = serde_json::json!({
        "error": error.to_string(),
        "severity": error.severity(),
    });

    match error {
        SecurityError::MissingIdentity | SecurityError::MissingCredential => {
            HttpResponse::BadRequest().json(body)
        }
        SecurityError::InvalidToken(_) | SecurityError::ExpiredToken => {
            HttpResponse::Unauthorized().json(body)
        }
        SecurityError::IdentityMismatch(_) => HttpResponse::Forbidden().json(body),
    }
}

/// 提取查询参数
fn query_param(req: &HttpRequest, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    req.uri().query().and_then(|q| {
        q.split('&')
            .find(|s| s.starts_with(&prefix))
            .and_then(|s| s.strip_prefix(prefix.as_str()))
            .map(|s| s.to_string())
    })
}

/// WebSocket 路由处理函数
pub async fn ws_route(
    req: HttpRequest,
    stream: web::Payload,
    server: web::Data<Arc<WebSocketServer>>,
) -> Result<HttpResponse, Error> {
    server.handle_connection(req, stream).await
}
