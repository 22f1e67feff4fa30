use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::SupervisorConfig;

/// procvisor - 远程进程守护服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// 监听端口
    #[arg(short, long, env = "PORT", default_value_t = 9999)]
    pub port: u16,

    /// 监听地址
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// 数据目录（dump.json、logs/、bin/）
    #[arg(long, env = "PROCVISOR_HOME", default_value = ".procvisor")]
    pub home: PathBuf,

    /// SIGTERM 后的等待时间（毫秒）
    #[arg(long, env = "GRACE_PERIOD_MS", default_value_t = 5000)]
    pub grace_period_ms: u64,

    /// SIGKILL 后的等待时间（毫秒）
    #[arg(long, env = "KILL_TIMEOUT_MS", default_value_t = 5000)]
    pub kill_timeout_ms: u64,

    /// 自动重启首次退避（毫秒）
    #[arg(long, env = "BACKOFF_BASE_MS", default_value_t = 500)]
    pub backoff_base_ms: u64,

    /// 自动重启退避上限（毫秒）
    #[arg(long, env = "BACKOFF_MAX_MS", default_value_t = 30000)]
    pub backoff_max_ms: u64,

    /// 连续崩溃次数上限，0 表示不限
    #[arg(long, env = "MAX_RESTARTS", default_value_t = 0)]
    pub max_restarts: u32,

    /// 稳定运行时长（毫秒），超过后清零崩溃计数
    #[arg(long, env = "MIN_UPTIME_MS", default_value_t = 10000)]
    pub min_uptime_ms: u64,

    /// 资源采样周期（毫秒）
    #[arg(long, env = "SAMPLE_INTERVAL_MS", default_value_t = 2000)]
    pub sample_interval_ms: u64,

    /// 启动时拉起 dump 文件中的进程
    #[arg(long, env = "RESURRECT", default_value_t = false)]
    pub resurrect: bool,

    /// Go 工具链
    #[arg(long, env = "GO", default_value = "go")]
    pub go: String,

    /// 跳过构建，source_path 直接作为可执行文件
    #[arg(long, env = "PREBUILT", default_value_t = false)]
    pub prebuilt: bool,
}

impl CommandArgs {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            home: self.home.clone(),
            grace_period: Duration::from_millis(self.grace_period_ms),
            kill_timeout: Duration::from_millis(self.kill_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
            max_restarts: self.max_restarts,
            min_uptime: Duration::from_millis(self.min_uptime_ms),
            sample_interval: Duration::from_millis(self.sample_interval_ms.max(100)),
        }
    }
}
