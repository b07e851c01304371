use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use serde_json::Value;

use crate::{ArcCache, PostgresOptions};

pub use self::postgres::PostgresDriver;

mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}")]
    Other(String),
    #[error("配置字段缺失: {0}")]
    MissingField(String),
    #[error("配置字段非法: {0}")]
    InvalidField(String),
    #[error("PostgreSQL 错误: {0}")]
    Postgres(#[from] ::postgres::Error),
    #[error("数据流读写失败: {0}")]
    Io(#[from] io::Error),
}

pub trait DatabaseDriver {
    type Config;

    fn check_connection(
        &self,
        config: &Self::Config,
    ) -> Result<(), DriverError>;

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn CopySession>, DriverError>;
}

/// 一次任务独占的数据库会话
///
/// 会话在 drop 时释放；未提交的事务随之回滚。
pub trait CopySession: Send {
    /// 执行一条普通语句，返回影响行数
    fn execute(
        &mut self,
        sql: &str,
    ) -> Result<u64, DriverError>;

    /// 将命名参数以字面量形式绑定进 SQL 文本
    fn bind(
        &mut self,
        sql: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<String, DriverError>;

    /// 执行 `COPY ... TO STDOUT`，把数据流写入 writer
    fn copy_out(
        &mut self,
        command: &str,
        writer: &mut dyn Write,
    ) -> Result<Option<u64>, DriverError>;

    /// 执行 `COPY ... FROM STDIN`，从 reader 读取数据流
    fn copy_in(
        &mut self,
        command: &str,
        reader: &mut dyn Read,
    ) -> Result<Option<u64>, DriverError>;

    fn commit(&mut self) -> Result<(), DriverError>;
}

/// 按连接引用（conn_id）获取会话
pub trait ConnectionProvider {
    fn connect(
        &self,
        reference: &str,
    ) -> Result<Box<dyn CopySession>, DriverError>;
}

/// 从加密连接缓存中解析 conn_id
pub struct StoreProvider {
    cache: ArcCache,
}

impl StoreProvider {
    pub fn new(cache: ArcCache) -> Self {
        Self { cache }
    }

    fn options(
        &self,
        reference: &str,
    ) -> Result<PostgresOptions, DriverError> {
        let guard = self
            .cache
            .read()
            .map_err(|_| DriverError::Other("连接缓存锁已损坏".into()))?;
        guard
            .find(reference)
            .map(|c| c.options.clone())
            .ok_or_else(|| DriverError::InvalidField(format!("连接不存在: {}", reference)))
    }
}

impl ConnectionProvider for StoreProvider {
    fn connect(
        &self,
        reference: &str,
    ) -> Result<Box<dyn CopySession>, DriverError> {
        let options = self.options(reference)?;
        tracing::info!(conn_id = reference, endpoint = %options.endpoint(), "打开数据库会话");
        PostgresDriver.create_connection(&options)
    }
}

pub fn check_connection(opts: &PostgresOptions) -> Result<(), DriverError> {
    PostgresDriver.check_connection(opts)
}

pub fn create_connection(opts: &PostgresOptions) -> Result<Box<dyn CopySession>, DriverError> {
    PostgresDriver.create_connection(opts)
}

pub fn validate_sql(sql: &str) -> Result<(), DriverError> {
    if sql.trim().is_empty() {
        return Err(DriverError::InvalidField("sql".into()));
    }
    Ok(())
}

/// 生成 PostgreSQL 字符串字面量
///
/// 单引号加倍；含反斜杠时改用 `E'...'` 并转义反斜杠，
/// 与 `standard_conforming_strings` 的取值无关。
pub fn quote_literal(s: &str) -> String {
    let escaped = s.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{}'", escaped)
    }
}

/// 把 `%(name)s` 占位符替换为参数字面量
///
/// 参数为空时原样返回；有参数时 `%%` 还原为 `%`。
pub fn bind_params(
    sql: &str,
    params: &BTreeMap<String, Value>,
) -> Result<String, DriverError> {
    if params.is_empty() {
        return Ok(sql.to_string());
    }

    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('%') {
            out.push('%');
            rest = after;
        } else if let Some(named) = tail.strip_prefix('(') {
            let end = named
                .find(")s")
                .ok_or_else(|| DriverError::InvalidField(format!("占位符未闭合: {}", truncate(&rest[pos..]))))?;
            let name = &named[..end];
            let value = params
                .get(name)
                .ok_or_else(|| DriverError::InvalidField(format!("缺少查询参数: {}", name)))?;
            out.push_str(&render_value(value)?);
            rest = &named[end + 2..];
        } else {
            return Err(DriverError::InvalidField(format!(
                "不支持的占位符（仅支持 %(name)s）: {}",
                truncate(&rest[pos..])
            )));
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn render_value(value: &Value) -> Result<String, DriverError> {
    let text = match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            if s.contains('\0') {
                return Err(DriverError::InvalidField("参数字符串不能包含 NUL 字符".into()));
            }
            quote_literal(s)
        }
        Value::Array(items) => {
            let rendered = items.iter().map(render_value).collect::<Result<Vec<_>, _>>()?;
            format!("ARRAY[{}]", rendered.join(","))
        }
        Value::Object(_) => quote_literal(&value.to_string()),
    };
    Ok(text)
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(16) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn literal_doubles_quotes() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn literal_with_backslash_uses_escape_form() {
        assert_eq!(quote_literal("a\\b"), "E'a\\\\b'");
        assert_eq!(quote_literal("\\'"), "E'\\\\'''");
    }

    #[test]
    fn empty_params_leave_text_untouched() {
        let sql = "SELECT '100%%' AS pct";
        assert_eq!(bind_params(sql, &BTreeMap::new()).unwrap(), sql);
    }

    #[test]
    fn binds_named_params() {
        let bound = bind_params(
            "SELECT * FROM users WHERE name = %(name)s AND age > %(age)s AND active = %(active)s",
            &params(json!({"name": "x'; DROP TABLE users; --", "age": 30, "active": true})),
        )
        .unwrap();
        assert_eq!(
            bound,
            "SELECT * FROM users WHERE name = 'x''; DROP TABLE users; --' AND age > 30 AND active = true"
        );
    }

    #[test]
    fn binds_null_array_and_percent() {
        let bound = bind_params(
            "SELECT %(ids)s, %(missing)s, 'a%%b'",
            &params(json!({"ids": [1, 2, 3], "missing": null})),
        )
        .unwrap();
        assert_eq!(bound, "SELECT ARRAY[1,2,3], NULL, 'a%b'");
    }

    #[test]
    fn object_params_become_json_literals() {
        let bound = bind_params("SELECT %(doc)s::jsonb", &params(json!({"doc": {"k": "v"}}))).unwrap();
        assert_eq!(bound, "SELECT '{\"k\":\"v\"}'::jsonb");
    }

    #[test]
    fn rejects_unknown_and_positional_placeholders() {
        let p = params(json!({"a": 1}));
        assert!(matches!(
            bind_params("SELECT %(b)s", &p),
            Err(DriverError::InvalidField(_))
        ));
        assert!(matches!(bind_params("SELECT %s", &p), Err(DriverError::InvalidField(_))));
        assert!(matches!(bind_params("SELECT %(a", &p), Err(DriverError::InvalidField(_))));
    }

    #[test]
    fn rejects_nul_in_string_param() {
        let p = params(json!({"a": "x\u{0000}y"}));
        assert!(bind_params("SELECT %(a)s", &p).is_err());
    }
}
