//! 实时通道消息协议定义
//!
//! 文本帧承载 JSON；服务端消息统一携带 type/data/timestamp

use crate::preference::PreferenceUpdate;
use serde::{Deserialize, Serialize};

/// 客户端发送的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 心跳
    Ping,

    /// 标记已读（转发到投递追踪器的 READ 迁移）
    MarkRead { notification_id: String },

    /// 偏好更新（转发到偏好仓储，本层不处理）
    PreferenceUpdate {
        #[serde(flatten)]
        update: PreferenceUpdate,
    },
}

/// 服务端发送的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 连接建立成功
    Welcome {
        data: serde_json::Value,
        timestamp: i64,
    },

    /// 用户通知
    Notification {
        data: serde_json::Value,
        timestamp: i64,
    },

    /// 管理观察者广播
    AdminNotification {
        data: serde_json::Value,
        timestamp: i64,
    },

    /// 心跳响应
    Pong { timestamp: i64 },

    /// 错误消息
    Error { code: u32, message: String },
}

impl ServerMessage {
    pub fn welcome(data: serde_json::Value) -> Self {
        Self::Welcome {
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn notification(data: serde_json::Value) -> Self {
        Self::Notification {
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn admin_notification(data: serde_json::Value) -> Self {
        Self::AdminNotification {
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
