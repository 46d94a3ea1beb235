//! 通知模板
//!
//! 命名、带版本的模板内容，声明必填/可选变量。
//! 模板对分发管线只读；CRUD 生命周期由外部管理端负责。

pub mod renderer;

pub use renderer::TemplateRenderer;

use crate::notification::{NotificationCategory, Priority};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 通知模板
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// 模板名称（唯一键，如 trading-order-rejected）
    pub name: Arc<str>,

    /// 版本号
    pub version: u32,

    /// 标题模板（含 {{variable}} 占位符）
    pub subject: String,

    /// 正文模板
    pub content: String,

    /// 必填变量名
    pub required_variables: Vec<String>,

    /// 可选变量名
    pub optional_variables: Vec<String>,

    /// 类别
    pub category: NotificationCategory,

    /// 默认优先级
    pub default_priority: Priority,

    /// 激活标志（未激活等同于不存在）
    pub active: bool,
}

impl Template {
    pub fn new(
        name: impl Into<Arc<str>>,
        subject: impl Into<String>,
        content: impl Into<String>,
        category: NotificationCategory,
    ) -> Self {
        Self {
            name: name.into(),
            version: 1,
            subject: subject.into(),
            content: content.into(),
            required_variables: Vec::new(),
            optional_variables: Vec::new(),
            category,
            default_priority: Priority::Medium,
            active: true,
        }
    }

    pub fn with_required_variables(mut self, variables: Vec<String>) -> Self {
        self.required_variables = variables;
        self
    }

    pub fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }
}

/// 模板仓储抽象（持久化实现由外部提供）
pub trait TemplateStore: Send + Sync {
    /// 按名称读取激活模板；未激活或不存在返回 None
    fn get_active(&self, name: &str) -> Option<Template>;

    /// 写入模板（同名覆盖，版本号递增由调用方负责）
    fn upsert(&self, template: Template);
}

/// 内存模板仓储
#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: DashMap<Arc<str>, Template>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn get_active(&self, name: &str) -> Option<Template> {
        self.templates
            .get(name)
            .filter(|t| t.active)
            .map(|t| t.clone())
    }

    fn upsert(&self, template: Template) {
        self.templates.insert(template.name.clone(), template);
    }
}
