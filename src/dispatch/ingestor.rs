//! 事件接入器（EventIngestor）
//!
//! 职责：
//! 1. 消费上游交易事件队列（订单生命周期事件）
//! 2. 翻译为规范化通知请求：事件类型 → 模板名 + 优先级，
//!    correlationId 透传（缺省生成占位符，绝不因此失败）
//! 3. 有界的消费级重试，超限进入死信队列（避免无限重放）
//!
//! 熔断打开时事件仍然确认消费（避免重放风暴），
//! 以 CIRCUIT_OPEN 原因落 FAILED 历史记录。

use super::dispatcher::{DispatchResult, NotificationDispatcher};
use crate::notification::{ChannelType, NotificationCategory, NotificationRequest, Priority};
use crate::observability::metrics;
use crate::preference::PreferenceStore;
use crate::realtime::SessionRegistry;
use crate::{NotifyError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 上游订单事件（队列消息体）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    /// 上游已分配的通知ID（幂等键，可缺省）
    #[serde(default)]
    pub notification_id: Option<String>,

    /// 用户ID
    pub user_id: String,

    /// 事件类型（ORDER_PLACED / ORDER_FILLED / ORDER_REJECTED / ...）
    pub event_type: String,

    /// 标题
    pub title: String,

    /// 正文
    pub content: String,

    /// 事件附加数据（同时作为模板变量）
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// 事件时间（毫秒时间戳）
    pub timestamp: i64,
}

/// 死信记录
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: OrderEvent,
    pub error: String,
    pub failed_at: i64,
}

/// 接入器配置
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// 模板名前缀域（如 trading）
    pub domain: String,

    /// 消费级最大重试次数（超限进死信）
    pub max_consumer_retries: u32,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            domain: "trading".to_string(),
            max_consumer_retries: 3,
        }
    }
}

/// 接入器统计信息
#[derive(Debug, Default)]
pub struct IngestStats {
    pub consumed: AtomicU64,
    pub dispatched: AtomicU64,
    pub dead_lettered: AtomicU64,
}

/// 统计信息快照
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatsSnapshot {
    pub consumed: u64,
    pub dispatched: u64,
    pub dead_lettered: u64,
}

/// 事件接入器
pub struct EventIngestor {
    dispatcher: Arc<NotificationDispatcher>,
    preferences: Arc<dyn PreferenceStore>,
    registry: Arc<SessionRegistry>,
    config: IngestorConfig,

    /// 事件队列接收端
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<OrderEvent>>>,

    /// 死信队列
    dead_letters: Mutex<Vec<DeadLetter>>,

    stats: Arc<IngestStats>,
}

impl EventIngestor {
    pub fn new(
        dispatcher: Arc<NotificationDispatcher>,
        preferences: Arc<dyn PreferenceStore>,
        registry: Arc<SessionRegistry>,
        config: IngestorConfig,
        receiver: mpsc::UnboundedReceiver<OrderEvent>,
    ) -> Self {
        Self {
            dispatcher,
            preferences,
            registry,
            config,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            dead_letters: Mutex::new(Vec::new()),
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// 启动事件消费任务
    pub fn start_event_consumer(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = {
                    let mut receiver = self.receiver.lock().await;
                    receiver.recv().await
                };

                match event {
                    Some(event) => self.process_with_retries(event).await,
                    None => break, // 队列关闭
                }
            }

            log::info!("Event consumer stopped");
        })
    }

    /// 带有界重试的事件处理；超限进入死信队列
    async fn process_with_retries(&self, event: OrderEvent) {
        self.stats.consumed.fetch_add(1, Ordering::Relaxed);
        metrics::EVENTS_CONSUMED.inc();

        let mut attempts = 0u32;
        loop {
            match self.handle_event(&event).await {
                Ok(result) => {
                    self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "Event {} for user {} dispatched: {:?}",
                        event.event_type,
                        event.user_id,
                        result.notification_id
                    );
                    return;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts > self.config.max_consumer_retries {
                        log::error!(
                            "Event moved to dead letter after {} attempts: type={} user={} title={:?} error={}",
                            attempts,
                            event.event_type,
                            event.user_id,
                            event.title,
                            e
                        );
                        self.dead_letters.lock().push(DeadLetter {
                            event,
                            error: e.to_string(),
                            failed_at: chrono::Utc::now().timestamp_millis(),
                        });
                        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                        metrics::DEAD_LETTERS.inc();
                        return;
                    }
                    log::warn!(
                        "Event processing failed (attempt {}/{}): {}",
                        attempts,
                        self.config.max_consumer_retries,
                        e
                    );
                }
            }
        }
    }

    /// 处理单个事件：校验 → 翻译 → 分发
    ///
    /// 分发本身总是返回结果对象；此处的 Err 只代表
    /// 事件级错误（畸形事件）
    pub async fn handle_event(&self, event: &OrderEvent) -> Result<DispatchResult> {
        let request = self.to_request(event)?;
        Ok(self.dispatcher.dispatch(request).await)
    }

    /// 事件 → 规范化通知请求
    fn to_request(&self, event: &OrderEvent) -> Result<NotificationRequest> {
        if event.user_id.is_empty() {
            return Err(NotifyError::IngestError("event missing user_id".to_string()));
        }
        if event.event_type.is_empty() {
            return Err(NotifyError::IngestError("event missing event_type".to_string()));
        }

        let priority = Self::map_priority(&event.event_type);
        let template_name = Self::template_name(&self.config.domain, &event.event_type);

        // correlationId 透传，缺省生成占位符——绝不因此失败
        let correlation_id = event
            .data
            .get("correlationId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("corr-{}", uuid::Uuid::new_v4()));

        let channel = self.resolve_channel(&event.user_id);

        let mut request = NotificationRequest::new(
            channel,
            event.user_id.clone(),
            NotificationCategory::Trading,
            event.title.clone(),
            event.content.clone(),
        )
        .with_priority(priority)
        .with_template(template_name, event.data.clone())
        .with_correlation_id(correlation_id)
        .with_reference(event.event_type.clone(), "ORDER_EVENT");

        // 上游已分配通知ID时沿用（at-least-once 下保证历史记录幂等）
        if let Some(nid) = &event.notification_id {
            if !nid.is_empty() {
                request.notification_id = Arc::from(nid.as_str());
            }
        }

        Ok(request)
    }

    /// 事件类型 → 优先级
    ///
    /// 拒绝/撤销 → HIGH，成交 → MEDIUM，下单 → LOW，
    /// 未映射类型默认 MEDIUM
    pub fn map_priority(event_type: &str) -> Priority {
        let t = event_type.to_ascii_uppercase();
        if t.contains("REJECT") || t.contains("CANCEL") {
            Priority::High
        } else if t.contains("FILL") {
            Priority::Medium
        } else if t.contains("PLACE") {
            Priority::Low
        } else {
            Priority::Medium
        }
    }

    /// 事件类型 → 模板名：`<domain>-<event-type-lowercase-dashed>`
    ///
    /// 例：domain=trading, ORDER_PLACED → trading-order-placed
    pub fn template_name(domain: &str, event_type: &str) -> String {
        format!(
            "{}-{}",
            domain,
            event_type.to_ascii_lowercase().replace('_', "-")
        )
    }

    /// 渠道解析：在线用户走 in-app（实时路径）；
    /// 否则取偏好首选渠道（须在启用集合内）；
    /// 无偏好记录回退 email（兜底渠道）
    fn resolve_channel(&self, user_id: &str) -> ChannelType {
        if self.registry.is_connected(user_id) {
            return ChannelType::InApp;
        }

        match self.preferences.get(user_id) {
            Some(pref) if pref.enabled_channels.contains(&pref.preferred_channel) => {
                pref.preferred_channel
            }
            _ => ChannelType::Email,
        }
    }

    /// 死信队列长度
    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().len()
    }

    /// 取出全部死信（运维巡检/重放工具使用）
    pub fn drain_dead_letters(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.dead_letters.lock())
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            consumed: self.stats.consumed.load(Ordering::Relaxed),
            dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            dead_lettered: self.stats.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_mapping() {
        assert_eq!(EventIngestor::map_priority("ORDER_REJECTED"), Priority::High);
        assert_eq!(EventIngestor::map_priority("ORDER_CANCELLED"), Priority::High);
        assert_eq!(EventIngestor::map_priority("ORDER_FILLED"), Priority::Medium);
        assert_eq!(
            EventIngestor::map_priority("ORDER_PARTIALLY_FILLED"),
            Priority::Medium
        );
        assert_eq!(EventIngestor::map_priority("ORDER_PLACED"), Priority::Low);
        // 未映射类型默认 MEDIUM
        assert_eq!(EventIngestor::map_priority("ORDER_EXPIRED"), Priority::Medium);
    }

    #[test]
    fn test_template_name_derivation() {
        assert_eq!(
            EventIngestor::template_name("trading", "ORDER_PLACED"),
            "trading-order-placed"
        );
        assert_eq!(
            EventIngestor::template_name("trading", "ORDER_PARTIALLY_FILLED"),
            "trading-order-partially-filled"
        );
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{
            "notificationId": "n-1",
            "userId": "user_01",
            "eventType": "ORDER_REJECTED",
            "title": "Order rejected",
            "content": "Your order was rejected",
            "data": {"correlationId": "corr-7", "orderId": "O1"},
            "timestamp": 1728123456789
        }"#;

        let event: OrderEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.notification_id.as_deref(), Some("n-1"));
        assert_eq!(event.event_type, "ORDER_REJECTED");
        assert_eq!(
            event.data.get("correlationId").and_then(|v| v.as_str()),
            Some("corr-7")
        );

        // data 与 notificationId 可缺省
        let minimal = r#"{
            "userId": "user_01",
            "eventType": "ORDER_PLACED",
            "title": "t",
            "content": "c",
            "timestamp": 0
        }"#;
        let event: OrderEvent = serde_json::from_str(minimal).unwrap();
        assert!(event.notification_id.is_none());
        assert!(event.data.is_empty());
    }
}
