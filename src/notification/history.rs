//! 投递历史记录与状态机
//!
//! 每次投递尝试对应一条 NotificationHistory（审计记录），
//! 状态只允许前进：
//!
//! ```text
//! PENDING → SENT → DELIVERED → READ
//!    ↓       ↓
//!  FAILED ←──┘ → CANCELLED
//! ```
//!
//! FAILED 为终态，除非 retry_count < max_retry_attempts，
//! 此时外部重试调度器可重新提交（retry_count+1，状态回 PENDING）

use super::message::{ChannelType, NotificationCategory, Priority};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    /// 已受理，尚未尝试投递
    Pending,
    /// 渠道已接受
    Sent,
    /// 渠道确认送达
    Delivered,
    /// 终端用户已读（in-app/push）
    Read,
    /// 渠道拒绝或重试耗尽
    Failed,
    /// 显式取消（终态）
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// 是否为终态（FAILED 的重试资格由记录本身判断）
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Read | Self::Cancelled)
    }

    /// 状态机前进校验
    ///
    /// 幂等重入（next == self）视为合法，时间戳只在首次进入时写入
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => matches!(next, Self::Sent | Self::Failed | Self::Cancelled),
            Self::Sent => matches!(next, Self::Delivered | Self::Read | Self::Failed),
            Self::Delivered => matches!(next, Self::Read),
            Self::Read => false,
            Self::Failed => matches!(next, Self::Cancelled),
            Self::Cancelled => false,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 投递结果（由投递执行方上报）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// 渠道已接受
    Sent { external_id: String },
    /// 渠道拒绝或弹性封装耗尽
    ///
    /// permanent=true 表示永久失败（无效地址、服务商拒绝
    /// 这条消息），不具重试资格；瞬时失败（超时、5xx、熔断）
    /// 为 false
    Failed { reason: String, permanent: bool },
    /// 渠道确认送达
    Delivered,
    /// 终端用户已读
    Read,
}

/// 投递历史记录（审计/状态记录，永不删除）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationHistory {
    /// 通知ID（唯一）
    pub notification_id: Arc<str>,

    /// 关联ID
    pub correlation_id: Arc<str>,

    /// 渠道
    pub channel: ChannelType,

    /// 类别
    pub category: NotificationCategory,

    /// 接收人用户ID
    pub user_id: Arc<str>,

    /// 渲染后的标题
    pub subject: String,

    /// 渲染后的正文
    pub content: String,

    /// 命中的模板名称
    pub template_name: Option<String>,

    /// 优先级
    pub priority: Priority,

    /// 当前状态
    pub status: NotificationStatus,

    /// 渠道侧消息ID
    pub external_message_id: Option<String>,

    /// 失败原因
    pub error_message: Option<String>,

    /// 永久失败标记（true 时不具重试资格）
    pub permanent_failure: bool,

    /// 计划时间（毫秒时间戳）
    pub scheduled_at: i64,

    /// 首次进入 SENT 的时间
    pub sent_at: Option<i64>,

    /// 首次进入 DELIVERED 的时间
    pub delivered_at: Option<i64>,

    /// 首次进入 READ 的时间
    pub read_at: Option<i64>,

    /// 已重试次数
    pub retry_count: u32,

    /// 最大重试次数
    pub max_retry_attempts: u32,

    /// 业务引用ID
    pub reference_id: Option<String>,

    /// 业务引用类型
    pub reference_type: Option<String>,
}

impl NotificationHistory {
    /// 重试资格：仅瞬时 FAILED 且未达最大重试次数
    pub fn is_retry_eligible(&self) -> bool {
        self.status == NotificationStatus::Failed
            && !self.permanent_failure
            && self.retry_count < self.max_retry_attempts
    }
}
