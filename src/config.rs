use std::path::PathBuf;
use std::time::Duration;

/// Supervisor 运行参数
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// 数据目录：dump 文件、日志、构建产物
    pub home: PathBuf,
    /// SIGTERM 之后等待退出的时间
    pub grace_period: Duration,
    /// SIGKILL 之后等待退出的时间，超时即 Timeout 错误
    pub kill_timeout: Duration,
    /// 自动重启的首次退避
    pub backoff_base: Duration,
    /// 退避上限
    pub backoff_max: Duration,
    /// 连续崩溃次数上限，0 表示不限
    pub max_restarts: u32,
    /// 运行超过该时长视为稳定，清零连续崩溃计数
    pub min_uptime: Duration,
    /// 资源采样周期
    pub sample_interval: Duration,
}

impl SupervisorConfig {
    pub fn dump_path(&self) -> PathBuf {
        self.home.join("dump.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.home.join("bin")
    }

    /// 第 n 次连续崩溃后的退避时长
    pub fn backoff(&self, crashes: u32) -> Duration {
        let exp = crashes.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from(".procvisor"),
            grace_period: Duration::from_secs(5),
            kill_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            max_restarts: 0,
            min_uptime: Duration::from_secs(10),
            sample_interval: Duration::from_secs(2),
        }
    }
}
