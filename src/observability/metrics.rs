//! Prometheus 指标导出模块
//!
//! 提供分发管线监控指标，包括：
//! - 分发/拦截计数
//! - 渠道投递延迟
//! - 熔断器状态
//! - 实时连接数
//! - 事件消费与死信

use crate::resilience::CircuitState;
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    /// 全局 Prometheus Registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ═══════════════════════════════════════════════════════════════════
    // 分发指标
    // ═══════════════════════════════════════════════════════════════════

    /// 分发总数（按渠道和结果）
    pub static ref NOTIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("qanotify_notifications_total", "Total notifications by channel and status"),
        &["channel", "status"]
    ).expect("Failed to create NOTIFICATIONS_TOTAL metric");

    /// 偏好/静默拦截总数（按原因）
    pub static ref SUPPRESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("qanotify_suppressed_total", "Notifications suppressed by the preference gate"),
        &["reason"]
    ).expect("Failed to create SUPPRESSED_TOTAL metric");

    /// 渠道投递延迟 (秒)
    pub static ref DELIVERY_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("qanotify_delivery_latency_seconds", "Channel delivery latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["channel"]
    ).expect("Failed to create DELIVERY_LATENCY metric");

    // ═══════════════════════════════════════════════════════════════════
    // 弹性指标
    // ═══════════════════════════════════════════════════════════════════

    /// 熔断器状态（0=CLOSED, 1=HALF_OPEN, 2=OPEN）
    pub static ref CIRCUIT_STATE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("qanotify_circuit_state", "Circuit breaker state per channel (0=closed,1=half_open,2=open)"),
        &["channel"]
    ).expect("Failed to create CIRCUIT_STATE metric");

    // ═══════════════════════════════════════════════════════════════════
    // 实时连接指标
    // ═══════════════════════════════════════════════════════════════════

    /// 在线用户会话数
    pub static ref ACTIVE_SESSIONS: IntGauge = IntGauge::new(
        "qanotify_active_sessions", "Number of connected user sessions"
    ).expect("Failed to create ACTIVE_SESSIONS metric");

    /// 在线观察者会话数
    pub static ref ACTIVE_OBSERVERS: IntGauge = IntGauge::new(
        "qanotify_active_observers", "Number of connected observer sessions"
    ).expect("Failed to create ACTIVE_OBSERVERS metric");

    // ═══════════════════════════════════════════════════════════════════
    // 事件接入指标
    // ═══════════════════════════════════════════════════════════════════

    /// 已消费事件数
    pub static ref EVENTS_CONSUMED: IntCounter = IntCounter::new(
        "qanotify_events_consumed_total", "Total order events consumed"
    ).expect("Failed to create EVENTS_CONSUMED metric");

    /// 死信事件数
    pub static ref DEAD_LETTERS: IntCounter = IntCounter::new(
        "qanotify_dead_letters_total", "Events moved to the dead letter queue"
    ).expect("Failed to create DEAD_LETTERS metric");
}

/// 注册所有指标（进程启动时调用一次）
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(NOTIFICATIONS_TOTAL.clone()),
        Box::new(SUPPRESSED_TOTAL.clone()),
        Box::new(DELIVERY_LATENCY.clone()),
        Box::new(CIRCUIT_STATE.clone()),
        Box::new(ACTIVE_SESSIONS.clone()),
        Box::new(ACTIVE_OBSERVERS.clone()),
        Box::new(EVENTS_CONSUMED.clone()),
        Box::new(DEAD_LETTERS.clone()),
    ];

    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            // 重复注册（测试中多次初始化）不致命
            log::debug!("Metric registration skipped: {}", e);
        }
    }
}

/// 更新熔断器状态 gauge
pub fn set_circuit_state(channel: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0,
        CircuitState::HalfOpen => 1,
        CircuitState::Open => 2,
    };
    CIRCUIT_STATE.with_label_values(&[channel]).set(value);
}

/// Prometheus 文本导出
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        log::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
