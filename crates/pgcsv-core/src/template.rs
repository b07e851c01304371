use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde_json::Value;
use thiserror::Error;

/// 未知变量与语法错误（如未闭合的 `{{`）都由 handlebars 报告
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("模板渲染失败: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// `{{ name }}` 占位符的取值来源
///
/// 内置变量由任务 id 与逻辑日期派生，`params` 中的同名变量会覆盖内置变量。
#[derive(Debug, Clone)]
pub struct TemplateContext {
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new(
        task_id: &str,
        logical_date: DateTime<Utc>,
    ) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("task_id".into(), task_id.to_string());
        vars.insert("ds".into(), logical_date.format("%Y-%m-%d").to_string());
        vars.insert("ds_nodash".into(), logical_date.format("%Y%m%d").to_string());
        vars.insert("ts".into(), logical_date.to_rfc3339());
        Self { vars }
    }

    pub fn with_params(
        mut self,
        params: &BTreeMap<String, Value>,
    ) -> Self {
        for (name, value) in params {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            self.vars.insert(name.clone(), text);
        }
        self
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// 严格模式渲染，引用未定义的变量即报错
    pub fn render(
        &self,
        template: &str,
    ) -> Result<String, TemplateError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        // 渲染的是 SQL 与路径，不做 HTML 转义
        handlebars.register_escape_fn(handlebars::no_escape);
        Ok(handlebars.render_template(template, &self.vars)?)
    }

    pub fn render_opt(
        &self,
        template: Option<&str>,
    ) -> Result<Option<String>, TemplateError> {
        template.map(|t| self.render(t)).transpose()
    }
}
