//! 通知分发管线
//!
//! 事件接入 → 偏好网关 → 模板渲染 → {实时直推 ‖ 弹性渠道投递}
//! → 投递状态追踪。事件驱动：每条事件独立并发处理，不同
//! 通知之间不保证全局顺序。

pub mod dispatcher;
pub mod ingestor;

pub use dispatcher::{
    BatchDispatchResult, DeliveryPath, DispatchOutcome, DispatchResult,
    DispatcherStatsSnapshot, NotificationDispatcher,
};
pub use ingestor::{
    DeadLetter, EventIngestor, IngestStatsSnapshot, IngestorConfig, OrderEvent,
};
