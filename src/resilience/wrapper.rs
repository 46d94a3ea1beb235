//! 弹性封装（ResilientSender）
//!
//! 对单个渠道发送器叠加 熔断 + 重试 + 超时：
//! - OPEN 熔断直接短路，不消耗重试次数、不触达发送器
//! - 每次尝试受独立超时约束，超时取消在途调用，
//!   对熔断与重试均计为失败
//! - 永久拒绝不重试（服务商已应答，不计熔断失败）
//! - 所有失败以结构化原因码返回，调用方据此落历史记录

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::retry::RetryPolicy;
use crate::channel::{ChannelSender, OutboundMessage, SendError, SendReceipt};
use crate::notification::ChannelType;
use std::sync::Arc;
use std::time::Duration;

/// 结构化投递失败（非异常路径，调用方据原因码落库）
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// 熔断器打开，调用被短路
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// 重试耗尽
    #[error("retries exhausted: {last_error}")]
    RetryExhausted { last_error: String },

    /// 最后一次尝试超时
    #[error("call timed out")]
    Timeout,

    /// 服务商永久拒绝该消息
    #[error("rejected by provider: {reason}")]
    Rejected { reason: String },
}

impl DeliveryError {
    /// 原因码（历史记录 error_message 前缀，运维据此区分
    /// “服务商不可用”与“服务商拒绝这条消息”）
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::Timeout => "TIMEOUT",
            Self::Rejected { .. } => "REJECTED",
        }
    }

    /// 瞬时失败可由外部调度器重试；永久拒绝不可
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// 弹性封装后的渠道发送器（每渠道一个实例）
pub struct ResilientSender {
    sender: Arc<dyn ChannelSender>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ResilientSender {
    pub fn new(
        sender: Arc<dyn ChannelSender>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            sender,
            breaker,
            retry,
            call_timeout,
        }
    }

    pub fn channel(&self) -> ChannelType {
        self.sender.channel()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// 投递一条消息（熔断 + 重试 + 超时）
    pub async fn deliver(&self, message: &OutboundMessage) -> Result<SendReceipt, DeliveryError> {
        let mut last_error = String::new();
        let mut last_was_timeout = false;
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            // OPEN 熔断短路：不消耗重试次数、不触达发送器
            if !self.breaker.is_call_permitted() {
                log::warn!(
                    "Delivery blocked by circuit breaker {} (state={}) notification={}",
                    self.breaker.name(),
                    self.breaker.state(),
                    message.notification_id
                );
                return Err(DeliveryError::CircuitOpen);
            }

            match tokio::time::timeout(self.call_timeout, self.sender.send(message)).await {
                Ok(Ok(receipt)) => {
                    self.breaker.record_success();
                    return Ok(receipt);
                }
                Ok(Err(SendError::Permanent(reason))) => {
                    // 服务商已应答：不计熔断失败，不重试
                    self.breaker.record_success();
                    log::warn!(
                        "Channel {} permanently rejected notification {}: {}",
                        self.channel(),
                        message.notification_id,
                        reason
                    );
                    return Err(DeliveryError::Rejected { reason });
                }
                Ok(Err(SendError::Transient(reason))) => {
                    self.breaker.record_failure();
                    log::warn!(
                        "Channel {} transient failure (attempt {}/{}) notification={}: {}",
                        self.channel(),
                        attempt,
                        max_attempts,
                        message.notification_id,
                        reason
                    );
                    last_error = reason;
                    last_was_timeout = false;
                }
                Err(_elapsed) => {
                    // 超时：在途调用被取消，对熔断与重试均计失败
                    self.breaker.record_failure();
                    log::warn!(
                        "Channel {} call timed out after {:?} (attempt {}/{}) notification={}",
                        self.channel(),
                        self.call_timeout,
                        attempt,
                        max_attempts,
                        message.notification_id
                    );
                    last_error = format!("timed out after {:?}", self.call_timeout);
                    last_was_timeout = true;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.retry.wait).await;
            }
        }

        if last_was_timeout {
            Err(DeliveryError::Timeout)
        } else {
            Err(DeliveryError::RetryExhausted { last_error })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 脚本化发送器：按预设行为响应，记录调用次数
    struct ScriptedSender {
        channel: ChannelType,
        calls: AtomicUsize,
        behavior: Behavior,
    }

    enum Behavior {
        AlwaysOk,
        AlwaysTransient,
        AlwaysPermanent,
        /// 前 N 次瞬时失败，之后成功
        FailThenOk(usize),
        /// 挂起直到超时
        Hang,
    }

    impl ScriptedSender {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                channel: ChannelType::Email,
                calls: AtomicUsize::new(0),
                behavior,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChannelSender for ScriptedSender {
        fn channel(&self) -> ChannelType {
            self.channel
        }

        async fn send(&self, _message: &OutboundMessage) -> Result<SendReceipt, SendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::AlwaysOk => Ok(SendReceipt {
                    external_id: format!("ext-{}", n),
                }),
                Behavior::AlwaysTransient => {
                    Err(SendError::Transient("provider 503".to_string()))
                }
                Behavior::AlwaysPermanent => {
                    Err(SendError::Permanent("invalid recipient".to_string()))
                }
                Behavior::FailThenOk(failures) => {
                    if n < *failures {
                        Err(SendError::Transient("provider 503".to_string()))
                    } else {
                        Ok(SendReceipt {
                            external_id: format!("ext-{}", n),
                        })
                    }
                }
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    unreachable!("call should be cancelled by timeout")
                }
            }
        }
    }

    fn make_message() -> OutboundMessage {
        OutboundMessage {
            notification_id: Arc::from("n1"),
            user_id: Arc::from("user_01"),
            to: "a@b.com".to_string(),
            subject: "s".to_string(),
            content: "c".to_string(),
            priority: crate::notification::Priority::Medium,
        }
    }

    fn make_wrapper(sender: Arc<ScriptedSender>, retry: RetryPolicy) -> ResilientSender {
        ResilientSender::new(
            sender,
            Arc::new(CircuitBreaker::new("email", CircuitBreakerConfig::default())),
            retry,
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let sender = ScriptedSender::new(Behavior::AlwaysOk);
        let wrapper = make_wrapper(sender.clone(), RetryPolicy::default());

        let receipt = wrapper.deliver(&make_message()).await.unwrap();
        assert!(!receipt.external_id.is_empty());
        assert_eq!(sender.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let sender = ScriptedSender::new(Behavior::FailThenOk(2));
        let wrapper = make_wrapper(
            sender.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        let result = wrapper.deliver(&make_message()).await;
        assert!(result.is_ok());
        assert_eq!(sender.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let sender = ScriptedSender::new(Behavior::AlwaysTransient);
        let wrapper = make_wrapper(
            sender.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        let err = wrapper.deliver(&make_message()).await.unwrap_err();
        assert_eq!(err.reason_code(), "RETRY_EXHAUSTED");
        assert!(err.is_transient());
        assert_eq!(sender.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_rejection_not_retried() {
        let sender = ScriptedSender::new(Behavior::AlwaysPermanent);
        let wrapper = make_wrapper(
            sender.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        let err = wrapper.deliver(&make_message()).await.unwrap_err();
        assert_eq!(err.reason_code(), "REJECTED");
        assert!(!err.is_transient());
        assert_eq!(sender.call_count(), 1);
        // 服务商已应答，熔断器保持 CLOSED
        assert_eq!(wrapper.breaker_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let sender = ScriptedSender::new(Behavior::Hang);
        let wrapper = make_wrapper(sender.clone(), RetryPolicy::no_retry());

        let err = wrapper.deliver(&make_message()).await.unwrap_err();
        assert_eq!(err.reason_code(), "TIMEOUT");
        assert_eq!(sender.call_count(), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits_without_reaching_sender() {
        let sender = ScriptedSender::new(Behavior::AlwaysOk);
        let breaker = Arc::new(CircuitBreaker::new(
            "email",
            CircuitBreakerConfig {
                failure_rate_threshold: 0.5,
                sliding_window_size: 10,
                min_calls: 5,
                open_wait: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        ));

        // 5 次调用 3 次失败触发熔断
        for i in 0..5 {
            if i % 2 == 0 {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let wrapper = ResilientSender::new(
            sender.clone(),
            breaker,
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_millis(50),
        );

        let err = wrapper.deliver(&make_message()).await.unwrap_err();
        assert_eq!(err.reason_code(), "CIRCUIT_OPEN");
        // 发送器完全未被触达
        assert_eq!(sender.call_count(), 0);
    }

    #[tokio::test]
    async fn test_breaker_opens_mid_retry_loop() {
        let sender = ScriptedSender::new(Behavior::AlwaysTransient);
        let breaker = Arc::new(CircuitBreaker::new(
            "email",
            CircuitBreakerConfig {
                failure_rate_threshold: 0.5,
                sliding_window_size: 4,
                min_calls: 2,
                open_wait: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        ));

        let wrapper = ResilientSender::new(
            sender.clone(),
            breaker,
            RetryPolicy::new(5, Duration::from_millis(1)),
            Duration::from_millis(50),
        );

        // 第二次失败后熔断打开，第三次尝试被短路
        let err = wrapper.deliver(&make_message()).await.unwrap_err();
        assert_eq!(err.reason_code(), "CIRCUIT_OPEN");
        assert_eq!(sender.call_count(), 2);
    }
}
