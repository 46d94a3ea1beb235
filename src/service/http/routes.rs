//! HTTP 路由配置

use super::handlers;
use actix_web::web;

/// 配置所有 HTTP 路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // 健康检查与指标
        .route("/health", web::get().to(handlers::health_check))
        .route("/metrics", web::get().to(handlers::metrics_export))
        // 通知 API
        .service(
            web::scope("/api/notification")
                .route("/send", web::post().to(handlers::send_notification))
                .route("/batch", web::post().to(handlers::send_batch))
                .route("/status/{notification_id}", web::get().to(handlers::query_status)),
        )
        // 事件注入与监控
        .service(
            web::scope("/api")
                .route("/events", web::post().to(handlers::publish_event))
                .route("/stats", web::get().to(handlers::query_stats)),
        );
}
