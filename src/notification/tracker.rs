//! 投递状态追踪器（DeliveryTracker）
//!
//! 职责：
//! 1. 请求受理时创建 PENDING 历史记录（先于任何渠道调用）
//! 2. 按状态机推进历史记录状态，时间戳只在首次进入时写入
//! 3. 暴露重试资格查询（供外部重试调度器使用）
//! 4. 支持受控重新提交（FAILED → PENDING，retry_count+1）

use super::history::{DeliveryOutcome, NotificationHistory, NotificationStatus};
use super::message::NotificationRequest;
use crate::{NotifyError, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 历史记录仓储抽象
///
/// 持久化实现（数据库）由外部提供，管线只依赖该 trait
pub trait HistoryRepository: Send + Sync {
    /// 写入新记录
    fn insert(&self, record: NotificationHistory);

    /// 按通知ID读取
    fn get(&self, notification_id: &str) -> Option<NotificationHistory>;

    /// 覆盖保存（记录必须已存在）
    fn save(&self, record: NotificationHistory);

    /// 按用户查询（最近优先不保证，审计用）
    fn list_by_user(&self, user_id: &str) -> Vec<NotificationHistory>;
}

/// 内存仓储实现（DashMap 无锁并发访问）
#[derive(Default)]
pub struct MemoryHistoryRepository {
    records: DashMap<Arc<str>, NotificationHistory>,
}

impl MemoryHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl HistoryRepository for MemoryHistoryRepository {
    fn insert(&self, record: NotificationHistory) {
        self.records.insert(record.notification_id.clone(), record);
    }

    fn get(&self, notification_id: &str) -> Option<NotificationHistory> {
        self.records.get(notification_id).map(|r| r.clone())
    }

    fn save(&self, record: NotificationHistory) {
        self.records.insert(record.notification_id.clone(), record);
    }

    fn list_by_user(&self, user_id: &str) -> Vec<NotificationHistory> {
        self.records
            .iter()
            .filter(|r| r.user_id.as_ref() == user_id)
            .map(|r| r.clone())
            .collect()
    }
}

/// Tracker统计信息
#[derive(Debug, Default)]
pub struct TrackerStats {
    /// 已受理记录数
    pub admitted: AtomicU64,

    /// 进入 SENT 的记录数
    pub sent: AtomicU64,

    /// 进入 FAILED 的记录数
    pub failed: AtomicU64,

    /// 重新提交次数
    pub readmitted: AtomicU64,
}

/// 统计信息快照
#[derive(Debug, Clone)]
pub struct TrackerStatsSnapshot {
    pub admitted: u64,
    pub sent: u64,
    pub failed: u64,
    pub readmitted: u64,
}

/// 投递状态追踪器
pub struct DeliveryTracker {
    repository: Arc<dyn HistoryRepository>,
    stats: Arc<TrackerStats>,
}

impl DeliveryTracker {
    pub fn new(repository: Arc<dyn HistoryRepository>) -> Self {
        Self {
            repository,
            stats: Arc::new(TrackerStats::default()),
        }
    }

    /// 受理请求：创建 PENDING 记录并返回历史ID
    ///
    /// 必须在任何渠道调用之前执行，保证每次尝试可审计
    pub fn record_admission(&self, request: &NotificationRequest) -> Arc<str> {
        let record = NotificationHistory {
            notification_id: request.notification_id.clone(),
            correlation_id: request.correlation_id.clone(),
            channel: request.channel,
            category: request.category,
            user_id: request.user_id.clone(),
            subject: request.subject.clone(),
            content: request.content.clone(),
            template_name: request.template_name.clone(),
            priority: request.priority,
            status: NotificationStatus::Pending,
            external_message_id: None,
            error_message: None,
            permanent_failure: false,
            scheduled_at: request.scheduled_at,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            retry_count: 0,
            max_retry_attempts: request.max_retry_attempts,
            reference_id: request.reference_id.clone(),
            reference_type: request.reference_type.clone(),
        };

        self.repository.insert(record);
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);
        log::debug!("Notification {} admitted (PENDING)", request.notification_id);

        request.notification_id.clone()
    }

    /// 受理后更新渲染结果（渲染发生在受理之后、投递之前）
    pub fn record_rendered(
        &self,
        notification_id: &str,
        subject: &str,
        content: &str,
        template_name: Option<&str>,
    ) {
        if let Some(mut record) = self.repository.get(notification_id) {
            record.subject = subject.to_string();
            record.content = content.to_string();
            record.template_name = template_name.map(|s| s.to_string());
            self.repository.save(record);
        }
    }

    /// 上报投递结果，按状态机推进
    pub fn record_outcome(&self, notification_id: &str, outcome: DeliveryOutcome) -> Result<()> {
        let mut record = self
            .repository
            .get(notification_id)
            .ok_or_else(|| NotifyError::HistoryError(format!("record not found: {}", notification_id)))?;

        let now = chrono::Utc::now().timestamp_millis();
        let next = match &outcome {
            DeliveryOutcome::Sent { .. } => NotificationStatus::Sent,
            DeliveryOutcome::Failed { .. } => NotificationStatus::Failed,
            DeliveryOutcome::Delivered => NotificationStatus::Delivered,
            DeliveryOutcome::Read => NotificationStatus::Read,
        };

        if !record.status.can_transition_to(next) {
            return Err(NotifyError::HistoryError(format!(
                "illegal transition {} -> {} for {}",
                record.status, next, notification_id
            )));
        }

        match outcome {
            DeliveryOutcome::Sent { external_id } => {
                if record.external_message_id.is_none() {
                    record.external_message_id = Some(external_id);
                }
                if record.sent_at.is_none() {
                    record.sent_at = Some(now);
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                }
            }
            DeliveryOutcome::Failed { reason, permanent } => {
                record.error_message = Some(reason);
                record.permanent_failure = permanent;
                if record.status != NotificationStatus::Failed {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
            DeliveryOutcome::Delivered => {
                if record.delivered_at.is_none() {
                    record.delivered_at = Some(now);
                }
            }
            DeliveryOutcome::Read => {
                if record.read_at.is_none() {
                    record.read_at = Some(now);
                }
            }
        }

        record.status = next;
        self.repository.save(record);

        log::debug!("Notification {} -> {}", notification_id, next);
        Ok(())
    }

    /// 重试资格查询：FAILED 且 retry_count < max_retry_attempts
    pub fn is_retry_eligible(&self, notification_id: &str) -> bool {
        self.repository
            .get(notification_id)
            .map(|r| r.is_retry_eligible())
            .unwrap_or(false)
    }

    /// 受控重新提交：FAILED → PENDING，retry_count+1
    ///
    /// 由外部重试调度器调用；达到最大重试次数后永久拒绝
    pub fn readmit(&self, notification_id: &str) -> Result<()> {
        let mut record = self
            .repository
            .get(notification_id)
            .ok_or_else(|| NotifyError::HistoryError(format!("record not found: {}", notification_id)))?;

        if !record.is_retry_eligible() {
            return Err(NotifyError::HistoryError(format!(
                "notification {} is not retry eligible (status={}, retries={}/{})",
                notification_id, record.status, record.retry_count, record.max_retry_attempts
            )));
        }

        record.retry_count += 1;
        record.status = NotificationStatus::Pending;
        record.error_message = None;
        record.permanent_failure = false;
        self.repository.save(record);
        self.stats.readmitted.fetch_add(1, Ordering::Relaxed);

        log::info!("Notification {} readmitted for retry", notification_id);
        Ok(())
    }

    /// 显式取消（终态）
    pub fn cancel(&self, notification_id: &str) -> Result<()> {
        let mut record = self
            .repository
            .get(notification_id)
            .ok_or_else(|| NotifyError::HistoryError(format!("record not found: {}", notification_id)))?;

        if !record.status.can_transition_to(NotificationStatus::Cancelled) {
            return Err(NotifyError::HistoryError(format!(
                "cannot cancel {} in status {}",
                notification_id, record.status
            )));
        }

        record.status = NotificationStatus::Cancelled;
        self.repository.save(record);
        Ok(())
    }

    /// 状态查询投影
    pub fn status_of(&self, notification_id: &str) -> Option<NotificationHistory> {
        self.repository.get(notification_id)
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> TrackerStatsSnapshot {
        TrackerStatsSnapshot {
            admitted: self.stats.admitted.load(Ordering::Relaxed),
            sent: self.stats.sent.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            readmitted: self.stats.readmitted.load(Ordering::Relaxed),
        }
    }
}
