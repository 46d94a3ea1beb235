//! 内置渠道发送器实现
//!
//! 服务商适配器占位实现：校验地址、打日志、返回回执。
//! 生产部署时替换为真实服务商 SDK 适配器（SMTP/短信网关/APNs），
//! 对管线而言只要实现 `ChannelSender` 即可。

use super::{ChannelSender, OutboundMessage, SendError, SendReceipt};
use crate::notification::ChannelType;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

fn receipt() -> SendReceipt {
    SendReceipt {
        external_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 邮件发送器
#[derive(Default)]
pub struct EmailSender;

impl EmailSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        if message.to.is_empty() || !message.to.contains('@') {
            return Err(SendError::Permanent(format!(
                "invalid email address: {:?}",
                message.to
            )));
        }

        log::info!(
            "[EMAIL] to={} subject={} notification={}",
            message.to,
            message.subject,
            message.notification_id
        );
        Ok(receipt())
    }
}

/// 短信发送器
#[derive(Default)]
pub struct SmsSender;

impl SmsSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> ChannelType {
        ChannelType::Sms
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        if message.to.is_empty() {
            return Err(SendError::Permanent("missing phone number".to_string()));
        }

        log::info!(
            "[SMS] to={} notification={}",
            message.to,
            message.notification_id
        );
        Ok(receipt())
    }
}

/// 推送发送器
#[derive(Default)]
pub struct PushSender;

impl PushSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelSender for PushSender {
    fn channel(&self) -> ChannelType {
        ChannelType::Push
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        if message.to.is_empty() {
            return Err(SendError::Permanent("missing device token".to_string()));
        }

        log::info!(
            "[PUSH] to={} notification={}",
            message.to,
            message.notification_id
        );
        Ok(receipt())
    }
}

/// 站内信发送器（用户离线时的 in-app 落盘路径）
///
/// 在线用户走实时会话注册表直推；离线用户的 in-app 通知
/// 写入收件箱，待下次连接时由客户端拉取
#[derive(Default)]
pub struct InAppInboxSender {
    inbox: DashMap<Arc<str>, Vec<OutboundMessage>>,
}

impl InAppInboxSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取并清空用户收件箱
    pub fn drain_inbox(&self, user_id: &str) -> Vec<OutboundMessage> {
        self.inbox
            .remove(user_id)
            .map(|(_, messages)| messages)
            .unwrap_or_default()
    }

    pub fn inbox_len(&self, user_id: &str) -> usize {
        self.inbox.get(user_id).map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChannelSender for InAppInboxSender {
    fn channel(&self) -> ChannelType {
        ChannelType::InApp
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        self.inbox
            .entry(message.user_id.clone())
            .or_default()
            .push(message.clone());

        log::debug!(
            "[IN_APP] stored to inbox user={} notification={}",
            message.user_id,
            message.notification_id
        );
        Ok(receipt())
    }
}
