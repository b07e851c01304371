//! COPY 命令拼装
//!
//! 标识符一律加双引号并把内嵌的双引号加倍，选项值一律渲染为字符串字面量。
//! 这里只做转义，不拒绝任何输入。

use crate::LoadConfig;
use crate::driver::quote_literal;

/// 引用单个标识符：`my"col` -> `"my""col"`
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// 按 `.` 拆分 `schema.table` 后逐段引用
pub fn quote_table(table: &str) -> String {
    table.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// 显式列清单：`("a", "b")`；为空时返回空串
pub fn column_clause(columns: &[String]) -> String {
    if columns.is_empty() {
        return String::new();
    }
    let cols = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    format!("({})", cols)
}

/// 去掉首尾空白和末尾的 `;`
///
/// `COPY (...)` 的括号内不允许语句结束符。
pub fn normalize_query(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// 会话级语句超时，单位为毫秒
pub fn timeout_statement(minutes: u64) -> String {
    format!("SET statement_timeout = {};", minutes.saturating_mul(60_000))
}

pub fn export_command(
    bound_query: &str,
    include_header: bool,
) -> String {
    let header = if include_header { " HEADER" } else { "" };
    format!("COPY ({}) TO STDOUT WITH CSV{}", bound_query, header)
}

/// 显式列清单与协议自带的 HEADER 互斥，此时表头由读取端跳过
pub fn load_command(config: &LoadConfig) -> String {
    let columns = config.explicit_columns();

    let mut parts = vec!["COPY".to_string(), quote_table(&config.table_name)];
    if !columns.is_empty() {
        parts.push(column_clause(columns));
    }
    parts.push("FROM STDIN WITH CSV".into());
    parts.push(format!("DELIMITER {}", quote_literal(&config.delimiter)));
    parts.push(format!("QUOTE {}", quote_literal(&config.quote_char)));
    parts.push(format!("NULL {}", quote_literal(&config.null_string)));
    if config.has_header && columns.is_empty() {
        parts.push("HEADER".into());
    }
    parts.join(" ")
}

pub fn truncate_statement(table: &str) -> String {
    format!("TRUNCATE {}", quote_table(table))
}
