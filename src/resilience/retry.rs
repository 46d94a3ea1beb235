//! 重试策略
//!
//! 固定间隔重试，每渠道独立配置。重试只在熔断器
//! CLOSED/HALF_OPEN 时进行（由弹性封装保证）。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 重试策略（固定间隔）
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次调用）
    pub max_attempts: u32,

    /// 尝试间等待
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self { max_attempts, wait }
    }

    /// 不重试（只尝试一次）
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            wait: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.wait, Duration::from_millis(500));
    }

    #[test]
    fn test_no_retry() {
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }
}
