use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProcessStats {
    /// CPU 使用率 (百分比，多核可超过 100)
    pub cpu_usage: f32,

    /// 常驻内存 (字节)
    pub memory_bytes: u64,

    /// 内存使用率 (百分比，0-100)
    pub memory_percent: f32,

    /// 虚拟内存使用量 (字节)
    pub virtual_memory_bytes: u64,
}

impl ProcessStats {
    /// 进程已退出时使用的空采样
    pub fn empty() -> Self {
        Self::default()
    }
}
