//! 通知消息结构定义
//!
//! 设计原则：
//! 1. 类型安全 - 使用强类型枚举而非字符串
//! 2. 请求不可变 - NotificationRequest 构造后不再修改
//! 3. 高效序列化 - serde 零成本序列化

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 通知渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    Email,
    Sms,
    Push,
    InApp,
}

impl ChannelType {
    /// 返回渠道名称（静态字符串，零分配）
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::Push => "PUSH",
            Self::InApp => "IN_APP",
        }
    }

    /// 所有渠道
    pub fn all() -> [ChannelType; 4] {
        [Self::Email, Self::Sms, Self::Push, Self::InApp]
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通知类别
///
/// 偏好网关按类别过滤：marketing 需要显式开启，
/// system/trading/account 默认开启
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationCategory {
    Marketing,
    System,
    Trading,
    Account,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Marketing => "MARKETING",
            Self::System => "SYSTEM",
            Self::Trading => "TRADING",
            Self::Account => "ACCOUNT",
        }
    }

    pub fn all() -> [NotificationCategory; 4] {
        [Self::Marketing, Self::System, Self::Trading, Self::Account]
    }
}

/// 通知优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    /// 返回队列级别（0=最高，3=最低）
    pub fn queue_level(&self) -> u8 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// 通知请求（一次外发意图）
///
/// 由事件接入器或直接 API 调用构造，进入管线后不再修改。
/// `notification_id` 同时作为投递历史记录的主键。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// 通知ID（全局唯一）
    pub notification_id: Arc<str>,

    /// 渠道
    pub channel: ChannelType,

    /// 接收人用户ID
    pub user_id: Arc<str>,

    /// 邮件地址（EMAIL 渠道，可由偏好补全）
    pub email: Option<String>,

    /// 手机号（SMS 渠道，可由偏好补全）
    pub phone: Option<String>,

    /// 标题
    pub subject: String,

    /// 正文
    pub content: String,

    /// 模板名称（缺省时直接使用 subject/content）
    pub template_name: Option<String>,

    /// 模板变量
    pub variables: HashMap<String, serde_json::Value>,

    /// 类别
    pub category: NotificationCategory,

    /// 优先级
    pub priority: Priority,

    /// 计划发送时间（毫秒时间戳）
    pub scheduled_at: i64,

    /// 关联ID（跨系统追踪）
    pub correlation_id: Arc<str>,

    /// 业务引用ID（产生该通知的业务事件）
    pub reference_id: Option<String>,

    /// 业务引用类型
    pub reference_type: Option<String>,

    /// 最大重试次数
    pub max_retry_attempts: u32,
}

impl NotificationRequest {
    /// 创建新的通知请求
    pub fn new(
        channel: ChannelType,
        user_id: impl Into<Arc<str>>,
        category: NotificationCategory,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            notification_id: Arc::from(uuid::Uuid::new_v4().to_string()),
            channel,
            user_id: user_id.into(),
            email: None,
            phone: None,
            subject: subject.into(),
            content: content.into(),
            template_name: None,
            variables: HashMap::new(),
            category,
            priority: Priority::Medium,
            scheduled_at: chrono::Utc::now().timestamp_millis(),
            correlation_id: Arc::from(format!("corr-{}", uuid::Uuid::new_v4())),
            reference_id: None,
            reference_type: None,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_template(
        mut self,
        template_name: impl Into<String>,
        variables: HashMap<String, serde_json::Value>,
    ) -> Self {
        self.template_name = Some(template_name.into());
        self.variables = variables;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<Arc<str>>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_reference(
        mut self,
        reference_id: impl Into<String>,
        reference_type: impl Into<String>,
    ) -> Self {
        self.reference_id = Some(reference_id.into());
        self.reference_type = Some(reference_type.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_max_retry_attempts(mut self, max: u32) -> Self {
        self.max_retry_attempts = max;
        self
    }
}

/// 渲染结果（模板解析 + 变量替换之后的最终内容）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    /// 渲染后的标题
    pub subject: String,

    /// 渲染后的正文
    pub content: String,

    /// 命中的模板名称（未命中为 None，表示原样回退）
    pub template_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_roundtrip() {
        let json = serde_json::to_string(&ChannelType::InApp).unwrap();
        assert_eq!(json, "\"IN_APP\"");

        let ch: ChannelType = serde_json::from_str("\"SMS\"").unwrap();
        assert_eq!(ch, ChannelType::Sms);
    }

    #[test]
    fn test_priority_queue_level() {
        assert_eq!(Priority::Urgent.queue_level(), 0);
        assert_eq!(Priority::High.queue_level(), 1);
        assert_eq!(Priority::Medium.queue_level(), 2);
        assert_eq!(Priority::Low.queue_level(), 3);
        assert!(Priority::Urgent > Priority::Low);
    }

    #[test]
    fn test_request_defaults() {
        let req = NotificationRequest::new(
            ChannelType::Email,
            "user_01",
            NotificationCategory::Trading,
            "Order filled",
            "Your order has been filled",
        );

        assert_eq!(req.priority, Priority::Medium);
        assert_eq!(req.max_retry_attempts, DEFAULT_MAX_RETRY_ATTEMPTS);
        assert!(!req.notification_id.is_empty());
        assert!(req.correlation_id.starts_with("corr-"));
        assert!(req.template_name.is_none());
    }

    #[test]
    fn test_request_builder() {
        let mut vars = HashMap::new();
        vars.insert("orderId".to_string(), serde_json::json!("O123"));

        let req = NotificationRequest::new(
            ChannelType::Sms,
            "user_02",
            NotificationCategory::Trading,
            "s",
            "c",
        )
        .with_priority(Priority::High)
        .with_template("trading-order-rejected", vars)
        .with_correlation_id("corr-abc")
        .with_reference("O123", "ORDER");

        assert_eq!(req.priority, Priority::High);
        assert_eq!(req.template_name.as_deref(), Some("trading-order-rejected"));
        assert_eq!(req.correlation_id.as_ref(), "corr-abc");
        assert_eq!(req.reference_id.as_deref(), Some("O123"));
    }
}
