use std::path::PathBuf;

use crate::compress::FileEncoder;
use crate::copy::{export_command, normalize_query, timeout_statement};
use crate::driver::ConnectionProvider;

use super::{ExportConfig, TransferError, check_timeout, display_rows};

/// 执行查询并把结果以 CSV 写入 `csv_file_path`，返回该路径
///
/// 配置错误在建立连接前报告。COPY 中途失败时已写出的部分文件保留在原处。
pub fn run(
    provider: &dyn ConnectionProvider,
    config: &ExportConfig,
) -> Result<PathBuf, TransferError> {
    check_timeout(config.timeout)?;

    // 1. 解析并清理查询
    let raw = config.query_source()?.resolve()?;
    let query = normalize_query(&raw);
    if query.is_empty() {
        return Err(TransferError::Config("查询内容为空".into()));
    }

    let path = PathBuf::from(&config.csv_file_path);
    tracing::info!("执行查询并导出 CSV: {}", path.display());

    // 2. 会话内设置超时并绑定参数
    let mut session = provider.connect(&config.conn_id)?;
    session.execute(&timeout_statement(config.timeout))?;
    let bound = session.bind(query, &config.query_params)?;
    let command = export_command(&bound, config.has_header);
    tracing::debug!(command = %command, compression = config.compression.label());

    // 3. 流式写入目标文件
    let mut encoder = FileEncoder::create(&path, config.compression).map_err(TransferError::io(&path))?;
    let rows = match session.copy_out(&command, &mut encoder) {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!("导出失败，部分写入的文件未清理: {}", path.display());
            return Err(err.into());
        }
    };
    encoder.finish().map_err(TransferError::io(&path))?;

    tracing::info!(
        "CSV 已保存: {} ({} 行, {})",
        path.display(),
        display_rows(rows),
        if config.has_header { "含表头" } else { "无表头" }
    );
    Ok(path)
}
