//! # QANOTIFY-RS
//!
//! 多渠道通知分发服务 - 面向交易系统的事件驱动通知管线
//!
//! ## 核心能力
//!
//! - **事件接入**: 消费订单生命周期事件，翻译为规范化通知请求
//! - **偏好网关**: 渠道/类别开关、静默时段、按类别覆盖
//! - **模板渲染**: `{{variable}}` 替换，缺模板原样回退
//! - **弹性投递**: 每渠道独立的 熔断 + 重试 + 超时
//! - **状态追踪**: PENDING → SENT → DELIVERED → READ / FAILED 审计状态机
//! - **实时推送**: WebSocket 在线用户直推 + 观察者广播
//! - **对外服务**: WebSocket + HTTP API (基于 Actix-web)
//!
//! ## 架构设计
//!
//! ```text
//! 上游事件 (队列/HTTP)            客户端 (WebSocket)
//!     ↓                               ↕
//! Event Ingestor (dispatch/)     Session Registry (realtime/)
//!     ↓                               ↑
//! Preference Gate (preference/)      │ 在线直推
//!     ↓                               │
//! Template Renderer (template/) ─────┤
//!     ↓                               │ 离线
//! Resilient Sender (resilience/) → Channel Sender (channel/)
//!     ↓
//! Delivery Tracker (notification/)
//! ```

#![allow(dead_code)]

// ============================================================================
// 外部依赖
// ============================================================================

// Web 框架
pub use actix;
pub use actix_web;

// 异步运行时
pub use futures;
pub use tokio;

// 并发工具
pub use crossbeam;
pub use dashmap;
pub use parking_lot;

// 序列化
pub use serde;
pub use serde_json;

// 时间
pub use chrono;

// 日志
pub use log;

// 错误处理
pub use anyhow;
pub use thiserror;

// UUID
pub use uuid;

// ============================================================================
// 内部模块
// ============================================================================

/// 通知核心模型（请求/历史/状态追踪）
pub mod notification;

/// 用户偏好与发送网关
pub mod preference;

/// 通知模板与渲染
pub mod template;

/// 渠道发送器抽象
pub mod channel;

/// 渠道弹性策略（熔断/重试/超时）
pub mod resilience;

/// 分发管线（分发器 + 事件接入器）
pub mod dispatch;

/// 实时推送（会话注册表 + WebSocket 会话）
pub mod realtime;

/// 对外服务层 (WebSocket + HTTP)
pub mod service;

/// 能力/健康注册表
pub mod capability;

/// 可观测性模块 (Prometheus)
pub mod observability;

/// 工具模块
pub mod utils;

// ============================================================================
// 重导出常用类型
// ============================================================================

pub use dispatch::{DispatchOutcome, DispatchResult, EventIngestor, NotificationDispatcher, OrderEvent};
pub use notification::{
    ChannelType, DeliveryOutcome, DeliveryTracker, NotificationCategory, NotificationHistory,
    NotificationRequest, NotificationStatus, Priority,
};
pub use preference::{PreferenceGate, PreferenceStore, UserPreference};
pub use realtime::SessionRegistry;
pub use resilience::{CircuitBreaker, CircuitState, ResilientSender};
pub use template::{Template, TemplateRenderer, TemplateStore};

// ============================================================================
// 全局错误类型
// ============================================================================

/// 通知服务错误类型
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("History error: {0}")]
    HistoryError(String),

    #[error("Ingest error: {0}")]
    IngestError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
