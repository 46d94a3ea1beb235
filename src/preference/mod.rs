//! 用户通知偏好
//!
//! 每个用户一条偏好记录：渠道/类别开关、静默时段、联系方式、
//! 按类别覆盖开关、频率限制。首次交互时创建（显式或默认），
//! 只通过偏好更新操作修改，永不删除（通过 enabled 软禁用）。

pub mod gate;

pub use gate::{GateDecision, PreferenceGate, SuppressReason};

use crate::notification::{ChannelType, NotificationCategory};
use chrono::NaiveTime;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// 用户通知偏好
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreference {
    /// 用户ID
    pub user_id: Arc<str>,

    /// 通知总开关（false 时全部关闭）
    pub notifications_enabled: bool,

    /// 首选渠道
    pub preferred_channel: ChannelType,

    /// 启用的渠道集合
    pub enabled_channels: HashSet<ChannelType>,

    /// 启用的类别集合
    pub enabled_categories: HashSet<NotificationCategory>,

    /// 邮件地址
    pub email: Option<String>,

    /// 手机号
    pub phone: Option<String>,

    /// 推送设备令牌
    pub push_token: Option<String>,

    /// 静默时段开关
    pub quiet_hours_enabled: bool,

    /// 静默开始时间（当日时刻，无日期）
    pub quiet_start: Option<NaiveTime>,

    /// 静默结束时间
    pub quiet_end: Option<NaiveTime>,

    /// IANA 时区（如 Asia/Shanghai），解析失败按 UTC 处理
    pub timezone: String,

    /// 营销通知显式开启
    pub marketing_enabled: bool,

    /// 系统通知开关（默认开启）
    pub system_enabled: bool,

    /// 交易通知开关（默认开启）
    pub trading_enabled: bool,

    /// 账户通知开关（默认开启）
    pub account_enabled: bool,

    /// 频率限制：每小时上限（0 = 不限制；管线外执行）
    pub max_per_hour: u32,

    /// 频率限制：每日上限（0 = 不限制；管线外执行）
    pub max_per_day: u32,

    /// 更新时间（毫秒时间戳）
    pub updated_at: i64,
}

impl UserPreference {
    /// 首次交互时的默认偏好：in-app + email 启用，
    /// system/trading/account 开启，marketing 关闭
    pub fn default_for(user_id: impl Into<Arc<str>>) -> Self {
        let mut enabled_channels = HashSet::new();
        enabled_channels.insert(ChannelType::InApp);
        enabled_channels.insert(ChannelType::Email);

        let mut enabled_categories = HashSet::new();
        enabled_categories.insert(NotificationCategory::System);
        enabled_categories.insert(NotificationCategory::Trading);
        enabled_categories.insert(NotificationCategory::Account);

        Self {
            user_id: user_id.into(),
            notifications_enabled: true,
            preferred_channel: ChannelType::InApp,
            enabled_channels,
            enabled_categories,
            email: None,
            phone: None,
            push_token: None,
            quiet_hours_enabled: false,
            quiet_start: None,
            quiet_end: None,
            timezone: "UTC".to_string(),
            marketing_enabled: false,
            system_enabled: true,
            trading_enabled: true,
            account_enabled: true,
            max_per_hour: 0,
            max_per_day: 0,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 渠道对应的联系地址
    pub fn address_for(&self, channel: ChannelType) -> Option<&str> {
        match channel {
            ChannelType::Email => self.email.as_deref(),
            ChannelType::Sms => self.phone.as_deref(),
            ChannelType::Push => self.push_token.as_deref(),
            ChannelType::InApp => Some(self.user_id.as_ref()),
        }
    }
}

/// 偏好更新操作（WebSocket preference_update 消息转发到此）
///
/// 所有字段可选，只应用显式提供的变更
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceUpdate {
    pub notifications_enabled: Option<bool>,
    pub preferred_channel: Option<ChannelType>,
    pub enabled_channels: Option<Vec<ChannelType>>,
    pub enabled_categories: Option<Vec<NotificationCategory>>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub quiet_hours_enabled: Option<bool>,
    pub quiet_start: Option<NaiveTime>,
    pub quiet_end: Option<NaiveTime>,
    pub timezone: Option<String>,
    pub marketing_enabled: Option<bool>,
}

/// 偏好仓储抽象（持久化实现由外部提供）
pub trait PreferenceStore: Send + Sync {
    /// 读取用户偏好（缺失不是错误）
    fn get(&self, user_id: &str) -> Option<UserPreference>;

    /// 写入整条偏好
    fn upsert(&self, preference: UserPreference);

    /// 应用部分更新；记录不存在时先创建默认偏好
    fn apply_update(&self, user_id: &str, update: PreferenceUpdate);
}

/// 内存偏好仓储（DashMap 无锁并发访问）
#[derive(Default)]
pub struct MemoryPreferenceStore {
    preferences: DashMap<Arc<str>, UserPreference>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.preferences.len()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, user_id: &str) -> Option<UserPreference> {
        self.preferences.get(user_id).map(|p| p.clone())
    }

    fn upsert(&self, preference: UserPreference) {
        self.preferences
            .insert(preference.user_id.clone(), preference);
    }

    fn apply_update(&self, user_id: &str, update: PreferenceUpdate) {
        let mut preference = self
            .get(user_id)
            .unwrap_or_else(|| UserPreference::default_for(user_id.to_string()));

        if let Some(enabled) = update.notifications_enabled {
            preference.notifications_enabled = enabled;
        }
        if let Some(channel) = update.preferred_channel {
            preference.preferred_channel = channel;
        }
        if let Some(channels) = update.enabled_channels {
            preference.enabled_channels = channels.into_iter().collect();
        }
        if let Some(categories) = update.enabled_categories {
            preference.enabled_categories = categories.into_iter().collect();
        }
        if let Some(email) = update.email {
            preference.email = Some(email);
        }
        if let Some(phone) = update.phone {
            preference.phone = Some(phone);
        }
        if let Some(enabled) = update.quiet_hours_enabled {
            preference.quiet_hours_enabled = enabled;
        }
        if let Some(start) = update.quiet_start {
            preference.quiet_start = Some(start);
        }
        if let Some(end) = update.quiet_end {
            preference.quiet_end = Some(end);
        }
        if let Some(tz) = update.timezone {
            preference.timezone = tz;
        }
        if let Some(enabled) = update.marketing_enabled {
            preference.marketing_enabled = enabled;
        }
        preference.updated_at = chrono::Utc::now().timestamp_millis();

        self.upsert(preference);
        log::debug!("Preference updated for user {}", user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preference() {
        let pref = UserPreference::default_for("user_01");

        assert!(pref.notifications_enabled);
        assert!(pref.enabled_channels.contains(&ChannelType::InApp));
        assert!(pref.enabled_channels.contains(&ChannelType::Email));
        assert!(!pref.enabled_channels.contains(&ChannelType::Sms));
        assert!(pref.enabled_categories.contains(&NotificationCategory::Trading));
        assert!(!pref.marketing_enabled);
        assert!(!pref.quiet_hours_enabled);
    }

    #[test]
    fn test_apply_update_creates_default() {
        let store = MemoryPreferenceStore::new();
        assert!(store.get("user_01").is_none());

        store.apply_update(
            "user_01",
            PreferenceUpdate {
                phone: Some("+8613800000000".to_string()),
                enabled_channels: Some(vec![ChannelType::Sms, ChannelType::InApp]),
                ..Default::default()
            },
        );

        let pref = store.get("user_01").unwrap();
        assert_eq!(pref.phone.as_deref(), Some("+8613800000000"));
        assert!(pref.enabled_channels.contains(&ChannelType::Sms));
        assert!(!pref.enabled_channels.contains(&ChannelType::Email));
        // 未提供的字段保持默认
        assert!(pref.notifications_enabled);
    }

    #[test]
    fn test_address_for_channel() {
        let mut pref = UserPreference::default_for("user_01");
        pref.email = Some("a@b.com".to_string());

        assert_eq!(pref.address_for(ChannelType::Email), Some("a@b.com"));
        assert_eq!(pref.address_for(ChannelType::Sms), None);
        assert_eq!(pref.address_for(ChannelType::InApp), Some("user_01"));
    }
}
