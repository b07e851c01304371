use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{Compression, DriverError, TemplateContext, TemplateError};

pub mod export;
pub mod load;

#[cfg(test)]
pub(crate) mod mock;

#[derive(Error, Debug)]
pub enum TransferError {
    /// 连接建立前即可发现的配置问题，不应重试
    #[error("配置错误: {0}")]
    Config(String),

    #[error("模板渲染失败: {0}")]
    Template(#[from] TemplateError),

    #[error("文件读写失败 {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl TransferError {
    pub fn is_config(&self) -> bool {
        matches!(self, TransferError::Config(_) | TransferError::Template(_))
    }

    fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| TransferError::Io { path, source }
    }
}

/// 导出查询的来源，内联 SQL 优先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Inline(String),
    File(PathBuf),
}

impl QuerySource {
    pub fn resolve(&self) -> Result<String, TransferError> {
        match self {
            QuerySource::Inline(sql) => Ok(sql.clone()),
            QuerySource::File(path) => fs::read_to_string(path).map_err(TransferError::io(path)),
        }
    }
}

/// 导出配置（DB -> CSV）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub conn_id: String,
    pub csv_file_path: String,
    #[serde(default)]
    pub sql_query: Option<String>,
    #[serde(default)]
    pub sql_file_path: Option<String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, Value>,
    #[serde(default = "default_has_header")]
    pub has_header: bool,
    #[serde(default)]
    pub compression: Compression,
    /// 分钟
    #[serde(default = "default_timeout_minutes")]
    pub timeout: u64,
}

impl ExportConfig {
    pub fn new(
        conn_id: impl Into<String>,
        csv_file_path: impl Into<String>,
    ) -> Self {
        Self {
            conn_id: conn_id.into(),
            csv_file_path: csv_file_path.into(),
            sql_query: None,
            sql_file_path: None,
            query_params: BTreeMap::new(),
            has_header: default_has_header(),
            compression: Compression::None,
            timeout: default_timeout_minutes(),
        }
    }

    pub fn query_source(&self) -> Result<QuerySource, TransferError> {
        if let Some(sql) = self.sql_query.as_deref().filter(|s| !s.is_empty()) {
            return Ok(QuerySource::Inline(sql.to_string()));
        }
        if let Some(path) = self.sql_file_path.as_deref().filter(|s| !s.is_empty()) {
            return Ok(QuerySource::File(PathBuf::from(path)));
        }
        Err(TransferError::Config("sql_query 与 sql_file_path 必须提供其一".into()))
    }

    /// 渲染模板字段：sql_query、sql_file_path、csv_file_path
    pub fn render(
        &self,
        ctx: &TemplateContext,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            sql_query: ctx.render_opt(self.sql_query.as_deref())?,
            sql_file_path: ctx.render_opt(self.sql_file_path.as_deref())?,
            csv_file_path: ctx.render(&self.csv_file_path)?,
            ..self.clone()
        })
    }
}

/// 加载配置（CSV -> DB）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub conn_id: String,
    /// `table` 或 `schema.table`
    pub table_name: String,
    pub csv_file_path: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_quote_char")]
    pub quote_char: String,
    #[serde(default)]
    pub null_string: String,
    #[serde(default = "default_has_header")]
    pub has_header: bool,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub truncate: bool,
    #[serde(default)]
    pub compression: Compression,
    /// 分钟
    #[serde(default = "default_timeout_minutes")]
    pub timeout: u64,
}

impl LoadConfig {
    pub fn new(
        conn_id: impl Into<String>,
        table_name: impl Into<String>,
        csv_file_path: impl Into<String>,
    ) -> Self {
        Self {
            conn_id: conn_id.into(),
            table_name: table_name.into(),
            csv_file_path: csv_file_path.into(),
            delimiter: default_delimiter(),
            quote_char: default_quote_char(),
            null_string: String::new(),
            has_header: default_has_header(),
            columns: None,
            truncate: false,
            compression: Compression::None,
            timeout: default_timeout_minutes(),
        }
    }

    /// 显式列清单；`None` 与空列表等价
    pub fn explicit_columns(&self) -> &[String] {
        self.columns.as_deref().unwrap_or(&[])
    }

    /// 渲染模板字段：csv_file_path、table_name
    pub fn render(
        &self,
        ctx: &TemplateContext,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            csv_file_path: ctx.render(&self.csv_file_path)?,
            table_name: ctx.render(&self.table_name)?,
            ..self.clone()
        })
    }
}

fn default_has_header() -> bool {
    true
}

fn default_timeout_minutes() -> u64 {
    60
}

fn default_delimiter() -> String {
    ",".into()
}

fn default_quote_char() -> String {
    "\"".into()
}

fn check_timeout(minutes: u64) -> Result<(), TransferError> {
    if minutes == 0 {
        return Err(TransferError::Config("timeout 必须为正整数（分钟）".into()));
    }
    Ok(())
}

/// 行数未知时日志显示 unknown
pub fn display_rows(rows: Option<u64>) -> String {
    match rows {
        Some(n) => n.to_string(),
        None => "unknown".into(),
    }
}
