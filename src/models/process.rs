use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 进程的静态启动定义（会被持久化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// 进程名称（唯一标识符）
    pub name: String,
    /// 源码路径，非源码构建的进程为空
    #[serde(default)]
    pub source_path: String,
    /// 可执行文件路径
    pub executable_path: String,
    /// 启动参数
    #[serde(default)]
    pub args: Vec<String>,
    /// 意外退出后是否自动拉起
    #[serde(default)]
    pub keep_alive: bool,
}

/// 进程生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Restarting,
    Deleted,
}

impl ProcessState {
    /// pid 只在这些状态下有意义
    pub fn has_pid(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Restarting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Restarting => "restarting",
            ProcessState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 注册表中的进程记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    #[serde(flatten)]
    pub definition: ProcessDefinition,
    /// 当前 PID，未运行时为 0
    pub pid: u32,
    pub state: ProcessState,
    /// 由 supervisor 发起的重启次数
    pub restart_count: u32,
    /// 启动时间戳（Unix 时间）
    pub started_at: u64,
    pub last_exit_code: Option<i32>,
    pub last_error: Option<String>,
}

impl ProcessRecord {
    pub fn new(definition: ProcessDefinition) -> Self {
        Self {
            definition,
            pid: 0,
            state: ProcessState::Stopped,
            restart_count: 0,
            started_at: 0,
            last_exit_code: None,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// 运行时长（秒），只有 Running 状态才有值
    pub fn uptime(&self, now: u64) -> u64 {
        if self.state == ProcessState::Running {
            now.saturating_sub(self.started_at)
        } else {
            0
        }
    }

    /// 进入非运行状态时清理 pid
    pub fn mark_stopped(&mut self) {
        self.state = ProcessState::Stopped;
        self.pid = 0;
    }

    /// `GetProcByName` 返回的详情
    pub fn detail(&self, now: u64) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), self.definition.name.clone());
        map.insert("source_path".to_string(), self.definition.source_path.clone());
        map.insert(
            "executable_path".to_string(),
            self.definition.executable_path.clone(),
        );
        map.insert("args".to_string(), self.definition.args.join(" "));
        map.insert("keep_alive".to_string(), self.definition.keep_alive.to_string());
        map.insert("pid".to_string(), self.pid.to_string());
        map.insert("state".to_string(), self.state.to_string());
        map.insert("restart_count".to_string(), self.restart_count.to_string());
        map.insert("started_at".to_string(), self.started_at.to_string());
        map.insert("uptime".to_string(), self.uptime(now).to_string());
        map.insert(
            "last_exit_code".to_string(),
            self.last_exit_code
                .map(|c| c.to_string())
                .unwrap_or_default(),
        );
        map.insert(
            "last_error".to_string(),
            self.last_error.clone().unwrap_or_default(),
        );
        map
    }
}

/// 状态快照：注册表记录 + 实时资源采样
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub name: String,
    pub pid: u32,
    pub state: ProcessState,
    /// 运行时长（秒）
    pub uptime: u64,
    pub restart_count: u32,
    /// CPU 使用率 (百分比)
    pub cpu_usage: f32,
    /// 常驻内存 (字节)
    pub memory_bytes: u64,
    /// 内存使用率 (百分比)
    #[serde(default)]
    pub memory_percent: f32,
    /// 虚拟内存 (字节)
    #[serde(default)]
    pub virtual_memory_bytes: u64,
}
