use std::collections::BTreeMap;
use std::fs;
use std::io::stderr;
use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_appender::{non_blocking, rolling::never};
use tracing_subscriber::{EnvFilter, fmt::layer, layer::SubscriberExt, util::SubscriberInitExt};

use pgcsv_core::{
    AppCache, ExportConfig, LoadConfig, StoreProvider, TemplateContext, TemplateError, TransferError, logs_dir,
    task_dir,
};

mod conn;
mod export;
mod load;

#[derive(Debug, Parser)]
#[command(name = "pgcsv-task", version, about = "PostgreSQL 与 CSV 文件之间的批量传输任务")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 执行任务目录下的 config.json
    Run {
        /// 任务目录
        #[arg(long, conflicts_with = "task_id", required_unless_present = "task_id")]
        task_dir: Option<PathBuf>,
        /// 使用 ~/.pgcsv/tasks/<TASK_ID> 作为任务目录
        #[arg(long)]
        task_id: Option<String>,
    },
    /// 管理已保存的连接
    Conn {
        #[command(subcommand)]
        action: conn::ConnAction,
    },
}

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Export, // DB -> CSV
    Load,   // CSV -> DB
}

/// 统一的任务配置
#[derive(Debug, Deserialize)]
pub struct TaskConfig {
    pub task_id: String,
    pub operation: Operation,
    /// 逻辑日期，模板变量 ds / ts 由它派生
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,

    // 各操作的配置（根据 operation 字段确定使用哪一个）
    #[serde(default)]
    pub export: Option<ExportConfig>,
    #[serde(default)]
    pub load: Option<LoadConfig>,
}

/// 模板渲染后的待执行任务
#[derive(Debug)]
pub enum Job {
    Export(ExportConfig),
    Load(LoadConfig),
}

impl TaskConfig {
    pub fn plan(&self) -> Result<Job, TransferError> {
        let ctx = TemplateContext::new(&self.task_id, self.created_at).with_params(&self.params);
        match self.operation {
            Operation::Export => {
                let config = self
                    .export
                    .as_ref()
                    .ok_or_else(|| TransferError::Config("缺少 export 配置".into()))?;
                Ok(Job::Export(config.render(&ctx)?))
            }
            Operation::Load => {
                let config = self
                    .load
                    .as_ref()
                    .ok_or_else(|| TransferError::Config("缺少 load 配置".into()))?;
                Ok(Job::Load(config.render(&ctx)?))
            }
        }
    }
}

/// 输出消息（写入 stdout 的 JSON Lines）
#[derive(Debug, Serialize)]
pub struct ProgressMessage {
    kind: MessageKind,
    data: serde_json::Value,
}

/// 消息类型
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Status,
    Error,
    Completed,
}

/// 初始化日志：stderr + 指定目录下的日志文件
fn init_logging(
    dir: &Path,
    file_name: &str,
) -> non_blocking::WorkerGuard {
    let log_file = never(dir, file_name);
    let (non_blocking, guard) = non_blocking(log_file);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(layer().with_writer(stderr))
        .with(layer().with_writer(non_blocking).with_ansi(false))
        .init();

    guard
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { task_dir: dir, task_id } => {
            let Some(dir) = resolve_task_dir(dir, task_id) else {
                print_error("fatal", "缺少 --task-dir 或 --task-id 参数");
                exit(1);
            };
            let _log_guard = init_logging(&dir, "task.log");
            tracing::info!("任务进程启动，task_dir: {:?}", dir);

            match run_task(&dir) {
                Ok(summary) => print_completed(summary),
                Err(err) => {
                    tracing::error!("任务失败: {:#}", err);
                    print_error(severity(&err), &format!("{:#}", err));
                    exit(1);
                }
            }
        }
        Command::Conn { action } => {
            let _log_guard = init_logging(&logs_dir(), "pgcsv.log");
            if let Err(err) = conn::run(action) {
                tracing::error!("{:#}", err);
                print_error(severity(&err), &format!("{:#}", err));
                exit(1);
            }
        }
    }
}

fn resolve_task_dir(
    dir: Option<PathBuf>,
    task_id: Option<String>,
) -> Option<PathBuf> {
    dir.or_else(|| task_id.map(|id| task_dir(&id)))
}

fn run_task(dir: &Path) -> anyhow::Result<serde_json::Value> {
    // 1. 读取并解析任务配置
    let config_path = dir.join("config.json");
    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("无法读取配置文件: {}", config_path.display()))?;
    let config: TaskConfig = serde_json::from_str(&content).context("配置文件格式错误")?;
    tracing::info!("任务配置解析成功: task_id={}, operation={:?}", config.task_id, config.operation);

    // 2. 渲染模板字段
    let job = config.plan()?;

    // 3. 加载连接缓存
    let cache = AppCache::init().context("无法加载连接缓存")?;
    let provider = StoreProvider::new(cache);

    // 4. 根据 operation 分发处理
    match job {
        Job::Export(export_config) => export::run(&provider, &config.task_id, &export_config),
        Job::Load(load_config) => load::run(&provider, &config.task_id, &load_config),
    }
}

/// 配置类错误不应重试，其余视为致命错误
fn severity(err: &anyhow::Error) -> &'static str {
    for cause in err.chain() {
        if let Some(transfer) = cause.downcast_ref::<TransferError>() {
            return if transfer.is_config() { "config" } else { "fatal" };
        }
        if cause.is::<TemplateError>() || cause.is::<serde_json::Error>() {
            return "config";
        }
    }
    "fatal"
}

pub fn print_status(data: serde_json::Value) {
    print_message(ProgressMessage {
        kind: MessageKind::Status,
        data,
    });
}

pub fn print_error(
    severity: &str,
    message: &str,
) {
    print_message(ProgressMessage {
        kind: MessageKind::Error,
        data: serde_json::json!({
            "severity": severity,
            "message": message,
        }),
    });
}

pub fn print_completed(data: serde_json::Value) {
    print_message(ProgressMessage {
        kind: MessageKind::Completed,
        data,
    });
}

fn print_message(msg: ProgressMessage) {
    if let Ok(json) = serde_json::to_string(&msg) {
        println!("{}", json);
    }
}
