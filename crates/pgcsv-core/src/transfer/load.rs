use std::path::PathBuf;

use crate::compress::FileDecoder;
use crate::copy::{load_command, timeout_statement, truncate_statement};
use crate::driver::ConnectionProvider;

use super::{LoadConfig, TransferError, check_timeout, display_rows};

/// 把 `csv_file_path` 加载进 `table_name`，返回协议回报的行数（未知为 `None`）
///
/// TRUNCATE 与 COPY 在同一事务内，COPY 失败时清表一并回滚；成功后显式提交。
pub fn run(
    provider: &dyn ConnectionProvider,
    config: &LoadConfig,
) -> Result<Option<u64>, TransferError> {
    let path = PathBuf::from(&config.csv_file_path);
    if !path.exists() {
        return Err(TransferError::Config(format!("CSV 文件不存在: {}", path.display())));
    }
    check_timeout(config.timeout)?;
    if config.table_name.trim().is_empty() {
        return Err(TransferError::Config("table_name 不能为空".into()));
    }

    tracing::info!("加载 {} 到 {}", path.display(), config.table_name);
    let command = load_command(config);

    let mut session = provider.connect(&config.conn_id)?;
    session.execute(&timeout_statement(config.timeout))?;
    if config.truncate {
        tracing::info!("清空表 {}", config.table_name);
        session.execute(&truncate_statement(&config.table_name))?;
    }

    let mut decoder = FileDecoder::open(&path, config.compression).map_err(TransferError::io(&path))?;
    // 指定列清单时表头不交给协议处理，由这里直接丢弃
    if config.has_header && !config.explicit_columns().is_empty() {
        decoder.skip_line().map_err(TransferError::io(&path))?;
    }

    tracing::debug!(command = %command, compression = config.compression.label());
    let rows = session.copy_in(&command, &mut decoder)?;
    session.commit()?;

    tracing::info!(
        "已加载 {} 行: {} -> {}",
        display_rows(rows),
        path.display(),
        config.table_name
    );
    Ok(rows)
}
