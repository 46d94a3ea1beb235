//! 偏好网关（PreferenceGate）
//!
//! 纯判定逻辑，无副作用：决定某用户/渠道/类别在当前时刻
//! 是否允许发送。数据缺失不是错误——无偏好记录时按宽松
//! 默认处理（in-app/email 放行，marketing 拦截），网关永不抛错。
//!
//! 判定顺序（任一不满足即拦截，fail closed）：
//! 1. 通知总开关
//! 2. 渠道在启用集合内
//! 3. 类别在启用集合内
//! 4. 类别覆盖开关（marketing 需显式开启）
//! 5. 静默时段

use super::{PreferenceStore, UserPreference};
use crate::notification::{ChannelType, NotificationCategory};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

/// 拦截原因（调试日志与统计用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// 用户全局关闭通知
    GloballyDisabled,
    /// 渠道未启用
    ChannelDisabled,
    /// 类别未启用
    CategoryDisabled,
    /// 类别覆盖开关关闭（如营销未显式开启）
    CategoryOptOut,
    /// 处于静默时段
    QuietHours,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GloballyDisabled => "globally_disabled",
            Self::ChannelDisabled => "channel_disabled",
            Self::CategoryDisabled => "category_disabled",
            Self::CategoryOptOut => "category_opt_out",
            Self::QuietHours => "quiet_hours",
        }
    }
}

/// 网关判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Suppressed(SuppressReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// 偏好网关
pub struct PreferenceGate {
    store: Arc<dyn PreferenceStore>,
}

impl PreferenceGate {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// 判定是否允许发送
    pub fn allow(
        &self,
        user_id: &str,
        channel: ChannelType,
        category: NotificationCategory,
        now: DateTime<Utc>,
    ) -> bool {
        self.evaluate(user_id, channel, category, now).is_allowed()
    }

    /// 带拦截原因的判定
    pub fn evaluate(
        &self,
        user_id: &str,
        channel: ChannelType,
        category: NotificationCategory,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let preference = match self.store.get(user_id) {
            Some(p) => p,
            None => {
                // 无记录：宽松默认，in-app/email 放行，marketing 拦截
                if category == NotificationCategory::Marketing {
                    return GateDecision::Suppressed(SuppressReason::CategoryOptOut);
                }
                if !matches!(channel, ChannelType::InApp | ChannelType::Email) {
                    return GateDecision::Suppressed(SuppressReason::ChannelDisabled);
                }
                return GateDecision::Allowed;
            }
        };

        if !preference.notifications_enabled {
            return GateDecision::Suppressed(SuppressReason::GloballyDisabled);
        }

        if !preference.enabled_channels.contains(&channel) {
            return GateDecision::Suppressed(SuppressReason::ChannelDisabled);
        }

        if !preference.enabled_categories.contains(&category) {
            return GateDecision::Suppressed(SuppressReason::CategoryDisabled);
        }

        let category_enabled = match category {
            NotificationCategory::Marketing => preference.marketing_enabled,
            NotificationCategory::System => preference.system_enabled,
            NotificationCategory::Trading => preference.trading_enabled,
            NotificationCategory::Account => preference.account_enabled,
        };
        if !category_enabled {
            return GateDecision::Suppressed(SuppressReason::CategoryOptOut);
        }

        if Self::in_quiet_hours(&preference, now) {
            return GateDecision::Suppressed(SuppressReason::QuietHours);
        }

        GateDecision::Allowed
    }

    /// 静默时段判定
    ///
    /// 以用户时区的本地时刻 T 判断：S <= E 为同日窗口（含端点），
    /// S > E 为跨午夜窗口（T >= S 或 T <= E）。开关关闭或
    /// 任一端点缺失时永不拦截。
    fn in_quiet_hours(preference: &UserPreference, now: DateTime<Utc>) -> bool {
        if !preference.quiet_hours_enabled {
            return false;
        }

        let (start, end) = match (preference.quiet_start, preference.quiet_end) {
            (Some(s), Some(e)) => (s, e),
            _ => return false,
        };

        let tz: Tz = preference.timezone.parse().unwrap_or(chrono_tz::UTC);
        let local_time = now.with_timezone(&tz).time();

        within_window(start, end, local_time)
    }
}

/// 时间窗口包含判定（纯函数）
fn within_window(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> bool {
    if start <= end {
        start <= t && t <= end
    } else {
        // 跨午夜
        t >= start || t <= end
    }
}
