//! HTTP API 请求处理器

use actix_web::{web, HttpResponse, Result};
use std::sync::Arc;

use super::models::*;
use crate::capability::CapabilityRegistry;
use crate::dispatch::{EventIngestor, NotificationDispatcher, OrderEvent};
use crate::notification::NotificationRequest;
use crate::observability::metrics;
use crate::realtime::SessionRegistry;

/// 应用状态
pub struct AppState {
    pub dispatcher: Arc<NotificationDispatcher>,
    pub ingestor: Arc<EventIngestor>,
    pub registry: Arc<SessionRegistry>,
    pub capabilities: Arc<CapabilityRegistry>,

    /// 事件队列写入端（上游消息系统的本地注入口）
    pub event_tx: tokio::sync::mpsc::UnboundedSender<OrderEvent>,
}

/// 健康检查（能力注册表快照）
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": state.capabilities.overall(),
        "service": "qanotify",
        "capabilities": state.capabilities.snapshot(),
    }))
}

/// Prometheus 指标导出
pub async fn metrics_export() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::gather_text())
}

/// 发送单条通知
///
/// 同步调用总是返回结果对象（成功或结构化失败），
/// 调用方不会阻塞在重试完成上
pub async fn send_notification(
    req: web::Json<SendNotificationRequest>,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse> {
    let request = to_request(req.into_inner());
    let result = state.dispatcher.dispatch(request).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

/// 批量发送（多接收人，结果汇聚，单个失败不影响其他）
pub async fn send_batch(
    req: web::Json<BatchSendRequest>,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse> {
    let requests: Vec<NotificationRequest> =
        req.into_inner().notifications.into_iter().map(to_request).collect();

    let result = state.dispatcher.dispatch_batch(requests).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

/// 投递状态查询
pub async fn query_status(
    notification_id: web::Path<String>,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse> {
    match state.dispatcher.tracker().status_of(&notification_id) {
        Some(record) => {
            let response = NotificationStatusResponse {
                notification_id: record.notification_id.to_string(),
                correlation_id: record.correlation_id.to_string(),
                channel: record.channel,
                status: record.status.as_str().to_string(),
                priority: record.priority,
                retry_count: record.retry_count,
                max_retry_attempts: record.max_retry_attempts,
                retry_eligible: record.is_retry_eligible(),
                external_message_id: record.external_message_id,
                error_message: record.error_message,
                scheduled_at: record.scheduled_at,
                sent_at: record.sent_at,
                delivered_at: record.delivered_at,
                read_at: record.read_at,
            };
            Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
        }
        None => Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
            404,
            format!("notification not found: {}", notification_id),
        ))),
    }
}

/// 注入一条订单事件（上游队列的本地入口）
pub async fn publish_event(
    event: web::Json<OrderEvent>,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse> {
    match state.event_tx.send(event.into_inner()) {
        Ok(()) => Ok(HttpResponse::Accepted().json(ApiResponse::success(serde_json::json!({
            "queued": true
        })))),
        Err(e) => {
            log::error!("Event queue closed: {}", e);
            Ok(HttpResponse::ServiceUnavailable().json(ApiResponse::<()>::error(
                503,
                "event queue unavailable".to_string(),
            )))
        }
    }
}

/// 运行统计
pub async fn query_stats(state: web::Data<Arc<AppState>>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "dispatcher": state.dispatcher.get_stats(),
        "ingest": state.ingestor.get_stats(),
        "realtime": {
            "connected_users": state.registry.connected_users(),
            "connected_observers": state.registry.connected_observers(),
        },
        "dead_letters": state.ingestor.dead_letter_count(),
    }))
}

/// DTO → 领域请求
fn to_request(req: SendNotificationRequest) -> NotificationRequest {
    let mut request = NotificationRequest::new(
        req.channel,
        req.user_id,
        req.category,
        req.subject,
        req.content,
    );

    if let Some(priority) = req.priority {
        request = request.with_priority(priority);
    }
    if let Some(template_name) = req.template_name {
        request = request.with_template(template_name, req.variables);
    }
    if let Some(correlation_id) = req.correlation_id {
        request = request.with_correlation_id(correlation_id);
    }
    if let (Some(id), Some(ty)) = (req.reference_id, req.reference_type) {
        request = request.with_reference(id, ty);
    }
    if let Some(email) = req.email {
        request = request.with_email(email);
    }
    if let Some(phone) = req.phone {
        request = request.with_phone(phone);
    }
    if let Some(max) = req.max_retry_attempts {
        request = request.with_max_retry_attempts(max);
    }

    request
}
