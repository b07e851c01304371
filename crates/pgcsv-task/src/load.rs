use std::time::Instant;

use pgcsv_core::{ConnectionProvider, LoadConfig, transfer::load};

use crate::print_status;

/// 执行加载任务（CSV -> DB）
pub fn run(
    provider: &dyn ConnectionProvider,
    task_id: &str,
    config: &LoadConfig,
) -> anyhow::Result<serde_json::Value> {
    tracing::info!("准备加载: conn_id={}, 表={}", config.conn_id, config.table_name);
    print_status(serde_json::json!({
        "task_id": task_id,
        "operation": "load",
        "status": "running",
    }));

    let started = Instant::now();
    let rows = load::run(provider, config)?;

    // rows 为 None 时输出 null
    Ok(serde_json::json!({
        "status": "success",
        "table": config.table_name,
        "rows": rows,
        "truncated": config.truncate,
        "elapsed_seconds": started.elapsed().as_secs_f64(),
    }))
}

#[cfg(test)]
mod tests {
    use pgcsv_core::{CopySession, DriverError};

    use super::*;

    struct Unreachable;

    impl ConnectionProvider for Unreachable {
        fn connect(
            &self,
            reference: &str,
        ) -> Result<Box<dyn CopySession>, DriverError> {
            Err(DriverError::Other(format!("unexpected connect: {}", reference)))
        }
    }

    #[test]
    fn missing_csv_is_reported_without_connecting() {
        let config = LoadConfig::new("dw", "users", "/nonexistent/users.csv");
        let err = run(&Unreachable, "t1", &config).unwrap_err();
        assert!(format!("{:#}", err).contains("CSV 文件不存在"));
        assert!(!format!("{:#}", err).contains("unexpected connect"));
    }

    #[test]
    fn connect_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        std::fs::write(&path, "id\n1\n").unwrap();

        let config = LoadConfig::new("dw", "users", path.to_string_lossy());
        let err = run(&Unreachable, "t1", &config).unwrap_err();
        assert!(format!("{:#}", err).contains("unexpected connect: dw"));
    }
}
