//! 渠道弹性策略
//!
//! 每个持久化渠道一套独立调优的 熔断器 + 重试 + 超时。
//! 渠道成本/重要性不同，参数也不同：email 作为兜底渠道
//! 容忍更高失败率（更大窗口、更高阈值），SMS 每次尝试有
//! 费用，采用更严阈值、更小窗口快速失败。

pub mod circuit_breaker;
pub mod retry;
pub mod wrapper;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;
pub use wrapper::{DeliveryError, ResilientSender};
