//! 配置管理模块

use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub server: ServerConfig,
    pub http: HttpConfig,
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl NotifyConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    pub fn load_default() -> Result<Self, String> {
        Self::load_from_file("config/notify.toml")
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "QANotify".to_string(),
                environment: "development".to_string(),
                log_level: "info".to_string(),
            },
            http: HttpConfig {
                host: "127.0.0.1".to_string(),
                port: 8090,
            },
            websocket: WebSocketConfig {
                host: "127.0.0.1".to_string(),
                port: 8091,
            },
            dispatch: DispatchConfig::default(),
            ingest: IngestConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub environment: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl HttpConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub host: String,
    pub port: u16,
}

impl WebSocketConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 分发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// 并发处理上限（工作池大小）
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
        }
    }
}

/// 事件接入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// 模板名前缀域
    #[serde(default = "default_domain")]
    pub domain: String,

    /// 消费级最大重试次数
    #[serde(default = "default_consumer_retries")]
    pub max_consumer_retries: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            domain: "trading".to_string(),
            max_consumer_retries: 3,
        }
    }
}

/// 各渠道弹性配置
///
/// 渠道成本/重要性不同，参数独立调优：email 兜底渠道容忍
/// 更高失败率，SMS 每次尝试有费用、快速失败
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "ChannelConfig::email_default")]
    pub email: ChannelConfig,
    #[serde(default = "ChannelConfig::sms_default")]
    pub sms: ChannelConfig,
    #[serde(default = "ChannelConfig::push_default")]
    pub push: ChannelConfig,
    #[serde(default = "ChannelConfig::in_app_default")]
    pub in_app: ChannelConfig,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            email: ChannelConfig::email_default(),
            sms: ChannelConfig::sms_default(),
            push: ChannelConfig::push_default(),
            in_app: ChannelConfig::in_app_default(),
        }
    }
}

/// 单渠道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// 渠道开关
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 单次调用超时 (毫秒)
    pub call_timeout_ms: u64,

    /// 重试：最大尝试次数（含首次）
    pub retry_max_attempts: u32,

    /// 重试：尝试间等待 (毫秒)
    pub retry_wait_ms: u64,

    /// 熔断：失败率阈值（0.0 ~ 1.0）
    pub failure_rate_threshold: f64,

    /// 熔断：滑动窗口大小
    pub sliding_window_size: usize,

    /// 熔断：评估前最小调用数
    pub min_calls: usize,

    /// 熔断：OPEN 等待时长 (毫秒)
    pub open_wait_ms: u64,

    /// 熔断：HALF_OPEN 探测调用数
    pub half_open_max_calls: usize,
}

impl ChannelConfig {
    /// email：兜底渠道，容忍更高失败率、更大窗口
    pub fn email_default() -> Self {
        Self {
            enabled: true,
            call_timeout_ms: 5000,
            retry_max_attempts: 3,
            retry_wait_ms: 500,
            failure_rate_threshold: 0.6,
            sliding_window_size: 20,
            min_calls: 10,
            open_wait_ms: 30_000,
            half_open_max_calls: 3,
        }
    }

    /// sms：每次尝试有费用，严阈值、小窗口快速失败
    pub fn sms_default() -> Self {
        Self {
            enabled: true,
            call_timeout_ms: 3000,
            retry_max_attempts: 2,
            retry_wait_ms: 250,
            failure_rate_threshold: 0.4,
            sliding_window_size: 8,
            min_calls: 4,
            open_wait_ms: 60_000,
            half_open_max_calls: 2,
        }
    }

    pub fn push_default() -> Self {
        Self {
            enabled: true,
            call_timeout_ms: 3000,
            retry_max_attempts: 3,
            retry_wait_ms: 300,
            failure_rate_threshold: 0.5,
            sliding_window_size: 10,
            min_calls: 5,
            open_wait_ms: 30_000,
            half_open_max_calls: 3,
        }
    }

    /// in-app 落盘路径为本地操作，宽松配置
    pub fn in_app_default() -> Self {
        Self {
            enabled: true,
            call_timeout_ms: 1000,
            retry_max_attempts: 1,
            retry_wait_ms: 0,
            failure_rate_threshold: 0.8,
            sliding_window_size: 20,
            min_calls: 10,
            open_wait_ms: 10_000,
            half_open_max_calls: 3,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, Duration::from_millis(self.retry_wait_ms))
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: self.failure_rate_threshold,
            sliding_window_size: self.sliding_window_size,
            min_calls: self.min_calls,
            open_wait: Duration::from_millis(self.open_wait_ms),
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

// 默认值函数
fn default_max_concurrent() -> usize {
    64
}
fn default_domain() -> String {
    "trading".to_string()
}
fn default_consumer_retries() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_differ_per_channel() {
        let channels = ChannelsConfig::default();

        // email 容忍更高失败率、更大窗口；sms 更严、更小
        assert!(channels.email.failure_rate_threshold > channels.sms.failure_rate_threshold);
        assert!(channels.email.sliding_window_size > channels.sms.sliding_window_size);
        assert!(channels.sms.retry_max_attempts <= channels.email.retry_max_attempts);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [server]
            name = "QANotify"
            environment = "test"
            log_level = "debug"

            [http]
            host = "0.0.0.0"
            port = 9090

            [websocket]
            host = "0.0.0.0"
            port = 9091

            [channels.sms]
            enabled = false
            call_timeout_ms = 2000
            retry_max_attempts = 1
            retry_wait_ms = 100
            failure_rate_threshold = 0.3
            sliding_window_size = 6
            min_calls = 3
            open_wait_ms = 30000
            half_open_max_calls = 1
        "#;

        let config: NotifyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.http.bind_address(), "0.0.0.0:9090");
        // 未给出的 section 使用默认值
        assert_eq!(config.dispatch.max_concurrent, 64);
        assert_eq!(config.ingest.domain, "trading");
        assert!(config.channels.email.enabled);
        // 显式给出的覆盖默认
        assert!(!config.channels.sms.enabled);
        assert_eq!(config.channels.sms.min_calls, 3);
    }

    #[test]
    fn test_breaker_config_conversion() {
        let channel = ChannelConfig::sms_default();
        let breaker = channel.breaker_config();
        assert_eq!(breaker.open_wait, Duration::from_millis(60_000));
        assert_eq!(breaker.sliding_window_size, 8);
    }
}
