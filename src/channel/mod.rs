//! 渠道发送器抽象
//!
//! 上游邮件/短信/推送服务商的线上协议不在本服务范围内，
//! 统一收敛为 `ChannelSender` trait：接收渲染后的消息，
//! 异步返回成功回执或失败。失败区分瞬时（可重试）与
//! 永久（不可重试），供弹性封装与历史记录使用。

pub mod senders;

pub use senders::{EmailSender, InAppInboxSender, PushSender, SmsSender};

use crate::notification::{ChannelType, Priority};
use async_trait::async_trait;
use std::sync::Arc;

/// 渲染完成、待投递的出站消息
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// 通知ID（与历史记录对应）
    pub notification_id: Arc<str>,

    /// 接收人用户ID
    pub user_id: Arc<str>,

    /// 渠道地址（邮箱/手机号/设备令牌）
    pub to: String,

    /// 标题
    pub subject: String,

    /// 正文
    pub content: String,

    /// 优先级
    pub priority: Priority,
}

/// 渠道回执
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// 服务商侧消息ID
    pub external_id: String,
}

/// 渠道发送失败
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    /// 瞬时失败（超时前的网络错误、服务商 5xx），可重试
    #[error("transient send failure: {0}")]
    Transient(String),

    /// 永久失败（无效地址、服务商拒绝该消息），不可重试
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// 渠道发送器
///
/// 每个渠道一个实现；实现方负责服务商协议细节与
/// HTML 转义（如需要）
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// 所属渠道
    fn channel(&self) -> ChannelType;

    /// 发送一条渲染后的消息
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError>;
}
