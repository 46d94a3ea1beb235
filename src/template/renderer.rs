//! 模板渲染器（TemplateRenderer）
//!
//! 职责：
//! 1. 按名称解析激活模板；未命中时原样回退到调用方提供的
//!    标题/正文（管线永不因缺模板而阻塞）
//! 2. `{{variableName}}` 占位符替换，值按字符串表示注入
//! 3. 未知占位符保留原文（不失败、不吞掉，审计时可见缺口）
//!
//! 本层不做 HTML 转义；HTML 渠道的转义由渠道发送器负责。

use super::TemplateStore;
use crate::notification::RenderedMessage;
use std::collections::HashMap;
use std::sync::Arc;

/// 模板渲染器
pub struct TemplateRenderer {
    store: Arc<dyn TemplateStore>,
}

impl TemplateRenderer {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    /// 渲染：模板命中则替换变量，否则原样回退
    pub fn render(
        &self,
        template_name: Option<&str>,
        variables: &HashMap<String, serde_json::Value>,
        fallback_subject: &str,
        fallback_content: &str,
    ) -> RenderedMessage {
        let template = template_name.and_then(|name| self.store.get_active(name));

        match template {
            Some(template) => RenderedMessage {
                subject: substitute(&template.subject, variables),
                content: substitute(&template.content, variables),
                template_name: Some(template.name.to_string()),
            },
            None => {
                if let Some(name) = template_name {
                    log::debug!("Template {} not found, falling back to raw content", name);
                }
                RenderedMessage {
                    subject: fallback_subject.to_string(),
                    content: fallback_content.to_string(),
                    template_name: None,
                }
            }
        }
    }
}

/// 扫描 `{{name}}` 占位符并替换
///
/// 未知占位符保留原文；值为字符串时直接注入，
/// 其他 JSON 值使用紧凑序列化表示
fn substitute(text: &str, variables: &HashMap<String, serde_json::Value>) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        match after_open.find("}}") {
            Some(close) => {
                let name = after_open[..close].trim();
                match variables.get(name) {
                    Some(value) => output.push_str(&coerce(value)),
                    None => {
                        // 未解析的占位符保留原文
                        output.push_str(&rest[open..open + 2 + close + 2]);
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // 未闭合，剩余部分原样输出
                output.push_str(&rest[open..]);
                return output;
            }
        }
    }

    output.push_str(rest);
    output
}

/// JSON 值到字符串表示（字符串值不带引号）
fn coerce(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
