use std::time::Instant;

use pgcsv_core::{ConnectionProvider, ExportConfig, transfer::export};

use crate::print_status;

/// 执行导出任务（DB -> CSV）
pub fn run(
    provider: &dyn ConnectionProvider,
    task_id: &str,
    config: &ExportConfig,
) -> anyhow::Result<serde_json::Value> {
    tracing::info!("准备导出: conn_id={}, 目标={}", config.conn_id, config.csv_file_path);
    print_status(serde_json::json!({
        "task_id": task_id,
        "operation": "export",
        "status": "running",
    }));

    let started = Instant::now();
    let path = export::run(provider, config)?;

    Ok(serde_json::json!({
        "status": "success",
        "output_file": path.to_string_lossy(),
        "compression": config.compression.label(),
        "elapsed_seconds": started.elapsed().as_secs_f64(),
    }))
}
