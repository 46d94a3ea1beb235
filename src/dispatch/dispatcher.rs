//! 通知分发器（NotificationDispatcher）
//!
//! 管线编排：偏好网关 → 模板渲染 → {实时直推 ‖ 弹性渠道投递} → 状态追踪。
//!
//! 单条通知内各步骤串行；不同通知并发处理，由信号量限定
//! 工作池大小。批量分发对所有接收人汇聚结果，单个接收人
//! 失败不影响其他接收人（批量隔离）。
//!
//! 同步调用方永远拿到结果对象（成功或结构化失败），
//! 不会收到未处理的异常，也不会阻塞在重试完成上。

use crate::channel::OutboundMessage;
use crate::notification::{
    ChannelType, DeliveryOutcome, DeliveryTracker, NotificationRequest, RenderedMessage,
};
use crate::observability::metrics;
use crate::preference::{GateDecision, PreferenceGate, PreferenceStore};
use crate::realtime::{ServerMessage, SessionRegistry};
use crate::resilience::ResilientSender;
use crate::template::TemplateRenderer;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// 投递路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPath {
    /// 实时会话注册表直推
    Realtime,
    /// 弹性封装 + 渠道发送器
    Channel(ChannelType),
}

/// 单条通知的分发结果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// 已发送（历史记录 SENT）
    Sent { path: DeliveryPath },
    /// 被偏好/静默时段拦截（不落历史记录，不是失败）
    Suppressed { reason: &'static str },
    /// 投递失败（历史记录 FAILED，reason_code 可区分原因）
    Failed { reason_code: String, detail: String },
}

/// 分发结果
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    /// 历史记录ID（被拦截时为 None）
    pub notification_id: Option<Arc<str>>,

    /// 结果
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

impl DispatchResult {
    pub fn is_sent(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Sent { .. })
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Suppressed { .. })
    }
}

/// 批量分发汇总
#[derive(Debug, Serialize)]
pub struct BatchDispatchResult {
    pub total: usize,
    pub attempted: usize,
    pub suppressed: usize,
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<DispatchResult>,
}

/// 分发器统计信息
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub dispatched: AtomicU64,
    pub sent: AtomicU64,
    pub suppressed: AtomicU64,
    pub failed: AtomicU64,
    pub realtime_deliveries: AtomicU64,
}

/// 统计信息快照
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub dispatched: u64,
    pub sent: u64,
    pub suppressed: u64,
    pub failed: u64,
    pub realtime_deliveries: u64,
}

/// 通知分发器
pub struct NotificationDispatcher {
    gate: PreferenceGate,
    renderer: TemplateRenderer,
    tracker: Arc<DeliveryTracker>,
    registry: Arc<SessionRegistry>,
    preferences: Arc<dyn PreferenceStore>,

    /// 每渠道一个弹性封装发送器
    channels: HashMap<ChannelType, Arc<ResilientSender>>,

    /// 工作池上限
    limiter: Arc<Semaphore>,

    stats: Arc<DispatcherStats>,
}

impl NotificationDispatcher {
    pub fn new(
        gate: PreferenceGate,
        renderer: TemplateRenderer,
        tracker: Arc<DeliveryTracker>,
        registry: Arc<SessionRegistry>,
        preferences: Arc<dyn PreferenceStore>,
        channels: HashMap<ChannelType, Arc<ResilientSender>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            gate,
            renderer,
            tracker,
            registry,
            preferences,
            channels,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            stats: Arc::new(DispatcherStats::default()),
        }
    }

    pub fn tracker(&self) -> &Arc<DeliveryTracker> {
        &self.tracker
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn channel_sender(&self, channel: ChannelType) -> Option<&Arc<ResilientSender>> {
        self.channels.get(&channel)
    }

    /// 分发一条通知
    ///
    /// 一旦受理（PENDING 记录已创建），本次尝试必达
    /// SENT/FAILED 终态，即使触发方已断开
    pub async fn dispatch(&self, request: NotificationRequest) -> DispatchResult {
        let _permit = self.limiter.acquire().await;
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        // 1. 偏好网关（拦截不是失败：不落历史记录）
        let decision = self.gate.evaluate(
            &request.user_id,
            request.channel,
            request.category,
            chrono::Utc::now(),
        );
        if let GateDecision::Suppressed(reason) = decision {
            self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            metrics::SUPPRESSED_TOTAL
                .with_label_values(&[reason.as_str()])
                .inc();
            log::debug!(
                "Notification for user {} suppressed ({}) channel={} category={}",
                request.user_id,
                reason.as_str(),
                request.channel,
                request.category.as_str()
            );
            return DispatchResult {
                notification_id: None,
                outcome: DispatchOutcome::Suppressed {
                    reason: reason.as_str(),
                },
            };
        }

        // 2. 受理：先于任何渠道调用创建 PENDING 记录
        let notification_id = self.tracker.record_admission(&request);

        // 3. 模板渲染（缺模板降级为原样内容，不阻塞）
        let rendered = self.renderer.render(
            request.template_name.as_deref(),
            &request.variables,
            &request.subject,
            &request.content,
        );
        self.tracker.record_rendered(
            &notification_id,
            &rendered.subject,
            &rendered.content,
            rendered.template_name.as_deref(),
        );

        // 4. 在线用户的 in-app 通知走实时直推，跳过渠道发送器
        if request.channel == ChannelType::InApp && self.registry.is_connected(&request.user_id) {
            if self.deliver_realtime(&request, &rendered, &notification_id) {
                return DispatchResult {
                    notification_id: Some(notification_id),
                    outcome: DispatchOutcome::Sent {
                        path: DeliveryPath::Realtime,
                    },
                };
            }
            // 直推失败：损坏连接已被注册表摘除，回落到标准渠道路径
            log::warn!(
                "Realtime delivery failed for user {}, falling back to channel path",
                request.user_id
            );
        }

        // 5. 标准渠道路径：弹性封装 + 渠道发送器
        self.deliver_via_channel(&request, &rendered, notification_id)
            .await
    }

    /// 批量分发：汇聚所有接收人结果，单个失败不取消其他
    pub async fn dispatch_batch(&self, requests: Vec<NotificationRequest>) -> BatchDispatchResult {
        let total = requests.len();
        let futures = requests.into_iter().map(|request| self.dispatch(request));
        let results = futures::future::join_all(futures).await;

        let suppressed = results.iter().filter(|r| r.is_suppressed()).count();
        let sent = results.iter().filter(|r| r.is_sent()).count();
        let attempted = total - suppressed;
        let failed = attempted - sent;

        BatchDispatchResult {
            total,
            attempted,
            suppressed,
            sent,
            failed,
            results,
        }
    }

    /// 实时直推；成功立即记 SENT
    fn deliver_realtime(
        &self,
        request: &NotificationRequest,
        rendered: &RenderedMessage,
        notification_id: &Arc<str>,
    ) -> bool {
        let message = ServerMessage::notification(serde_json::json!({
            "notification_id": notification_id.as_ref(),
            "subject": rendered.subject,
            "content": rendered.content,
            "priority": request.priority.as_str(),
            "category": request.category.as_str(),
            "correlation_id": request.correlation_id.as_ref(),
        }));

        if !self.registry.send_to_user(&request.user_id, message) {
            return false;
        }

        if let Err(e) = self.tracker.record_outcome(
            notification_id,
            DeliveryOutcome::Sent {
                external_id: format!("realtime:{}", request.user_id),
            },
        ) {
            log::error!("Failed to record realtime SENT for {}: {}", notification_id, e);
        }

        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        self.stats.realtime_deliveries.fetch_add(1, Ordering::Relaxed);
        metrics::NOTIFICATIONS_TOTAL
            .with_label_values(&["REALTIME", "sent"])
            .inc();
        true
    }

    /// 渠道路径投递并落历史记录
    async fn deliver_via_channel(
        &self,
        request: &NotificationRequest,
        rendered: &RenderedMessage,
        notification_id: Arc<str>,
    ) -> DispatchResult {
        let channel = request.channel;
        let label = channel.as_str();

        let sender = match self.channels.get(&channel) {
            Some(s) => s.clone(),
            None => {
                return self.fail(
                    notification_id,
                    label,
                    "CHANNEL_UNAVAILABLE".to_string(),
                    format!("channel {} is not configured", channel),
                    true,
                );
            }
        };

        // 地址缺失不在此拦截：熔断检查优先于服务商校验，
        // 空地址由渠道发送器作为永久拒绝上报
        let to = self.resolve_address(request).unwrap_or_default();

        let message = OutboundMessage {
            notification_id: notification_id.clone(),
            user_id: request.user_id.clone(),
            to,
            subject: rendered.subject.clone(),
            content: rendered.content.clone(),
            priority: request.priority,
        };

        let started = std::time::Instant::now();
        let result = sender.deliver(&message).await;
        metrics::DELIVERY_LATENCY
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());
        metrics::set_circuit_state(label, sender.breaker_state());

        match result {
            Ok(receipt) => {
                if let Err(e) = self.tracker.record_outcome(
                    &notification_id,
                    DeliveryOutcome::Sent {
                        external_id: receipt.external_id,
                    },
                ) {
                    log::error!("Failed to record SENT for {}: {}", notification_id, e);
                }
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                metrics::NOTIFICATIONS_TOTAL
                    .with_label_values(&[label, "sent"])
                    .inc();

                DispatchResult {
                    notification_id: Some(notification_id),
                    outcome: DispatchOutcome::Sent {
                        path: DeliveryPath::Channel(channel),
                    },
                }
            }
            Err(e) => {
                let permanent = !e.is_transient();
                self.fail(
                    notification_id,
                    label,
                    e.reason_code().to_string(),
                    e.to_string(),
                    permanent,
                )
            }
        }
    }

    /// 地址解析：请求自带地址优先，缺省回退偏好记录的联系方式
    fn resolve_address(&self, request: &NotificationRequest) -> Option<String> {
        let from_request = match request.channel {
            ChannelType::Email => request.email.clone(),
            ChannelType::Sms => request.phone.clone(),
            ChannelType::Push | ChannelType::InApp => None,
        };
        if from_request.is_some() {
            return from_request;
        }

        self.preferences
            .get(&request.user_id)
            .and_then(|p| p.address_for(request.channel).map(|s| s.to_string()))
            .or_else(|| {
                // in-app 落盘路径地址即用户ID
                if request.channel == ChannelType::InApp {
                    Some(request.user_id.to_string())
                } else {
                    None
                }
            })
    }

    fn fail(
        &self,
        notification_id: Arc<str>,
        channel_label: &str,
        reason_code: String,
        detail: String,
        permanent: bool,
    ) -> DispatchResult {
        let reason = format!("{}: {}", reason_code, detail);
        if let Err(e) = self.tracker.record_outcome(
            &notification_id,
            DeliveryOutcome::Failed {
                reason: reason.clone(),
                permanent,
            },
        ) {
            log::error!("Failed to record FAILED for {}: {}", notification_id, e);
        }

        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        metrics::NOTIFICATIONS_TOTAL
            .with_label_values(&[channel_label, "failed"])
            .inc();
        log::warn!("Notification {} failed: {}", notification_id, reason);

        // 投递失败尽力通报管理观察者
        self.registry
            .broadcast_to_observers(ServerMessage::admin_notification(serde_json::json!({
                "notification_id": notification_id.as_ref(),
                "channel": channel_label,
                "reason": reason,
            })));

        DispatchResult {
            notification_id: Some(notification_id),
            outcome: DispatchOutcome::Failed {
                reason_code,
                detail,
            },
        }
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            sent: self.stats.sent.load(Ordering::Relaxed),
            suppressed: self.stats.suppressed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            realtime_deliveries: self.stats.realtime_deliveries.load(Ordering::Relaxed),
        }
    }
}
