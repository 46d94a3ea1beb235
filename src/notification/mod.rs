//! 通知核心模型
//!
//! 提供通知请求、投递历史与状态追踪：
//! - 消息定义和序列化
//! - 历史记录状态机（PENDING → SENT → DELIVERED → READ / FAILED / CANCELLED）
//! - 投递状态追踪（DeliveryTracker）

pub mod history;
pub mod message;
pub mod tracker;

// 导出核心类型
pub use history::{DeliveryOutcome, NotificationHistory, NotificationStatus};
pub use message::{
    ChannelType, NotificationCategory, NotificationRequest, Priority, RenderedMessage,
    DEFAULT_MAX_RETRY_ATTEMPTS,
};
pub use tracker::{
    DeliveryTracker, HistoryRepository, MemoryHistoryRepository, TrackerStatsSnapshot,
};
