//! HTTP API 请求/响应模型

use crate::notification::{ChannelType, NotificationCategory, Priority};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 通用响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// API 错误
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: u32,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: u32, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError { code, message }),
        }
    }
}

/// 发送通知请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNotificationRequest {
    pub user_id: String,
    pub channel: ChannelType,
    pub category: NotificationCategory,
    pub subject: String,
    pub content: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub template_name: Option<String>,

    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub priority: Option<Priority>,

    #[serde(default)]
    pub correlation_id: Option<String>,

    #[serde(default)]
    pub reference_id: Option<String>,

    #[serde(default)]
    pub reference_type: Option<String>,

    #[serde(default)]
    pub max_retry_attempts: Option<u32>,
}

/// 批量发送请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSendRequest {
    pub notifications: Vec<SendNotificationRequest>,
}

/// 历史记录状态投影（状态查询响应）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationStatusResponse {
    pub notification_id: String,
    pub correlation_id: String,
    pub channel: ChannelType,
    pub status: String,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retry_attempts: u32,
    pub retry_eligible: bool,
    pub external_message_id: Option<String>,
    pub error_message: Option<String>,
    pub scheduled_at: i64,
    pub sent_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub read_at: Option<i64>,
}
