use std::{fs::create_dir_all, path::PathBuf};

/// 获取 pgcsv 根目录（~/.pgcsv）
///
/// Fallback: 如果 home_dir 失败，使用 ./.pgcsv
pub fn root_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".pgcsv"))
        .unwrap_or_else(|| PathBuf::from(".pgcsv"))
}

/// 获取连接配置文件路径（~/.pgcsv/connections.db）
pub fn connections_db() -> PathBuf {
    let root = root_dir();
    let _ = create_dir_all(&root);
    root.join("connections.db")
}

/// 获取日志目录（~/.pgcsv/logs）
pub fn logs_dir() -> PathBuf {
    let dir = root_dir().join("logs");
    let _ = create_dir_all(&dir);
    dir
}

/// 获取任务根目录（~/.pgcsv/tasks）
pub fn tasks_dir() -> PathBuf {
    let dir = root_dir().join("tasks");
    let _ = create_dir_all(&dir);
    dir
}

/// 获取指定任务的目录（~/.pgcsv/tasks/{task_id}）
pub fn task_dir(id: &str) -> PathBuf {
    let dir = tasks_dir().join(id);
    let _ = create_dir_all(&dir);
    dir
}
