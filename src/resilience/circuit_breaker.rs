//! 熔断器（CircuitBreaker）
//!
//! 基于计数滑动窗口的熔断：
//!
//! ```text
//! CLOSED --(窗口内失败率超阈值, 且调用数达到下限)--> OPEN
//! OPEN --(等待时长到期)--> HALF_OPEN
//! HALF_OPEN --(探测调用全部成功)--> CLOSED
//! HALF_OPEN --(任一探测失败)--> OPEN
//! ```
//!
//! 调用方协议：`is_call_permitted()` 放行后执行调用，
//! 结束时调用 `record_success()` / `record_failure()`。
//! 内部以 parking_lot::Mutex 自行同步，调用方不加锁。

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 熔断器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// 失败率阈值（0.0 ~ 1.0）
    pub failure_rate_threshold: f64,

    /// 滑动窗口大小（最近 N 次调用）
    pub sliding_window_size: usize,

    /// 评估前的最小调用数
    pub min_calls: usize,

    /// OPEN 状态等待时长
    pub open_wait: Duration,

    /// HALF_OPEN 状态允许的探测调用数
    pub half_open_max_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            sliding_window_size: 10,
            min_calls: 5,
            open_wait: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

struct BreakerInner {
    state: CircuitState,

    /// 最近调用结果窗口（true = 失败）
    window: VecDeque<bool>,

    /// 窗口内失败数
    failures: usize,

    /// 进入 OPEN 的时刻
    opened_at: Option<Instant>,

    /// HALF_OPEN 已放行的探测数
    probes_permitted: usize,

    /// HALF_OPEN 已成功的探测数
    probes_succeeded: usize,
}

/// 熔断器（每渠道一个实例，独立调优）
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                failures: 0,
                opened_at: None,
                probes_permitted: 0,
                probes_succeeded: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前状态（OPEN 到期时惰性转入 HALF_OPEN）
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_transition_half_open(&mut inner);
        inner.state
    }

    /// 调用是否放行
    ///
    /// CLOSED 放行；OPEN 等待期内拒绝；HALF_OPEN 放行
    /// 限定数量的探测调用
    pub fn is_call_permitted(&self) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_transition_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.probes_permitted < self.config.half_open_max_calls {
                    inner.probes_permitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// 记录一次成功调用
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                self.push_result(&mut inner, false);
            }
            CircuitState::HalfOpen => {
                inner.probes_succeeded += 1;
                if inner.probes_succeeded >= self.config.half_open_max_calls {
                    self.close(&mut inner);
                }
            }
            CircuitState::Open => {} // 迟到的结果，忽略
        }
    }

    /// 记录一次失败调用（含超时）
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                self.push_result(&mut inner, true);
                let total = inner.window.len();
                if total >= self.config.min_calls {
                    let rate = inner.failures as f64 / total as f64;
                    if rate >= self.config.failure_rate_threshold {
                        self.open(&mut inner);
                    }
                }
            }
            CircuitState::HalfOpen => {
                // 探测失败，立即回到 OPEN
                self.open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// 强制打开（运维操作/测试）
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.open(&mut inner);
    }

    fn push_result(&self, inner: &mut BreakerInner, failed: bool) {
        inner.window.push_back(failed);
        if failed {
            inner.failures += 1;
        }
        while inner.window.len() > self.config.sliding_window_size {
            if let Some(evicted) = inner.window.pop_front() {
                if evicted {
                    inner.failures -= 1;
                }
            }
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            log::warn!("Circuit breaker {} -> OPEN", self.name);
        }
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probes_permitted = 0;
        inner.probes_succeeded = 0;
    }

    fn close(&self, inner: &mut BreakerInner) {
        log::info!("Circuit breaker {} -> CLOSED", self.name);
        inner.state = CircuitState::Closed;
        inner.window.clear();
        inner.failures = 0;
        inner.opened_at = None;
        inner.probes_permitted = 0;
        inner.probes_succeeded = 0;
    }

    fn maybe_transition_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed() >= self.config.open_wait)
                .unwrap_or(true);
            if elapsed {
                log::info!("Circuit breaker {} -> HALF_OPEN", self.name);
                inner.state = CircuitState::HalfOpen;
                inner.probes_permitted = 0;
                inner.probes_succeeded = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(open_wait_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 0.5,
            sliding_window_size: 10,
            min_calls: 5,
            open_wait: Duration::from_millis(open_wait_ms),
            half_open_max_calls: 2,
        }
    }

    #[test]
    fn test_opens_at_threshold_after_min_calls() {
        let breaker = CircuitBreaker::new("email", test_config(60_000));

        // 5 次调用，3 次失败（60% >= 50%）
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_call_permitted());
    }

    #[test]
    fn test_stays_closed_below_min_calls() {
        let breaker = CircuitBreaker::new("sms", test_config(60_000));

        // 4 次全失败但未达最小调用数
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.is_call_permitted());
    }

    #[test]
    fn test_half_open_after_wait_then_closes_on_probe_success() {
        let breaker = CircuitBreaker::new("email", test_config(20));

        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.is_call_permitted());

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // 放行两个探测调用，超出的拒绝
        assert!(breaker.is_call_permitted());
        assert!(breaker.is_call_permitted());
        assert!(!breaker.is_call_permitted());

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.is_call_permitted());
    }

    #[test]
    fn test_half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("email", test_config(20));

        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.is_call_permitted());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_call_permitted());
    }

    #[test]
    fn test_sliding_window_evicts_old_results() {
        let config = CircuitBreakerConfig {
            failure_rate_threshold: 0.5,
            sliding_window_size: 4,
            min_calls: 4,
            open_wait: Duration::from_secs(60),
            half_open_max_calls: 1,
        };
        let breaker = CircuitBreaker::new("push", config);

        // 两次早期失败被后续成功挤出窗口
        breaker.record_failure();
        breaker.record_failure();
        for _ in 0..4 {
            breaker.record_success();
        }
        breaker.record_failure();

        // 窗口内 [成功,成功,成功,失败] = 25% < 50%
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_force_open() {
        let breaker = CircuitBreaker::new("email", test_config(60_000));
        assert!(breaker.is_call_permitted());

        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_call_permitted());
    }
}
