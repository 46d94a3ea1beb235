//! 能力/健康注册表
//!
//! 显式静态构建的能力清单：启动时在组装根登记
//! `{名称, 探测处理器, 熟练度, 超时策略}` 元组，处理器是
//! 一等函数值——不做任何运行时反射/注解扫描。
//! `/health` 端点渲染注册表快照。

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Up,
    Degraded,
    Down,
}

/// 探测结果
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityHealth {
    pub state: HealthState,
    pub detail: String,
}

impl CapabilityHealth {
    pub fn up(detail: impl Into<String>) -> Self {
        Self {
            state: HealthState::Up,
            detail: detail.into(),
        }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            state: HealthState::Degraded,
            detail: detail.into(),
        }
    }

    pub fn down(detail: impl Into<String>) -> Self {
        Self {
            state: HealthState::Down,
            detail: detail.into(),
        }
    }
}

/// 探测处理器（一等函数值）
pub type CapabilityProbe = Arc<dyn Fn() -> CapabilityHealth + Send + Sync>;

/// 一项能力登记
#[derive(Clone)]
pub struct Capability {
    /// 能力名称（如 channel.email）
    pub name: &'static str,

    /// 熟练度（0.0 ~ 1.0，路由参考值）
    pub proficiency: f64,

    /// 该能力对应操作的超时策略
    pub timeout: Duration,

    /// 健康探测处理器
    pub probe: CapabilityProbe,
}

/// 能力快照（健康端点输出）
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySnapshot {
    pub name: &'static str,
    pub proficiency: f64,
    pub timeout_ms: u64,
    pub state: HealthState,
    pub detail: String,
}

/// 能力注册表（启动时一次性构建，之后只读）
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一项能力
    pub fn register(
        &mut self,
        name: &'static str,
        proficiency: f64,
        timeout: Duration,
        probe: CapabilityProbe,
    ) -> &mut Self {
        self.capabilities.push(Capability {
            name,
            proficiency,
            timeout,
            probe,
        });
        log::info!("Capability registered: {} (proficiency={})", name, proficiency);
        self
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// 运行所有探测，产出快照
    pub fn snapshot(&self) -> Vec<CapabilitySnapshot> {
        self.capabilities
            .iter()
            .map(|cap| {
                let health = (cap.probe)();
                CapabilitySnapshot {
                    name: cap.name,
                    proficiency: cap.proficiency,
                    timeout_ms: cap.timeout.as_millis() as u64,
                    state: health.state,
                    detail: health.detail,
                }
            })
            .collect()
    }

    /// 汇总状态：任一 Down 则 Down，任一 Degraded 则 Degraded
    pub fn overall(&self) -> HealthState {
        let mut overall = HealthState::Up;
        for snapshot in self.snapshot() {
            match snapshot.state {
                HealthState::Down => return HealthState::Down,
                HealthState::Degraded => overall = HealthState::Degraded,
                HealthState::Up => {}
            }
        }
        overall
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_registration_and_snapshot() {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            "channel.email",
            0.9,
            Duration::from_secs(5),
            Arc::new(|| CapabilityHealth::up("breaker CLOSED")),
        );
        registry.register(
            "channel.sms",
            0.7,
            Duration::from_secs(3),
            Arc::new(|| CapabilityHealth::degraded("breaker HALF_OPEN")),
        );

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "channel.email");
        assert_eq!(snapshot[0].state, HealthState::Up);
        assert_eq!(snapshot[1].timeout_ms, 3000);

        assert_eq!(registry.overall(), HealthState::Degraded);
    }

    #[test]
    fn test_overall_down_dominates() {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            "a",
            1.0,
            Duration::from_secs(1),
            Arc::new(|| CapabilityHealth::up("")),
        );
        registry.register(
            "b",
            1.0,
            Duration::from_secs(1),
            Arc::new(|| CapabilityHealth::down("breaker OPEN")),
        );

        assert_eq!(registry.overall(), HealthState::Down);
    }
}
