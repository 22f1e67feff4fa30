use crate::models::ProcessStats;
use std::collections::HashMap;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// 资源采样器
///
/// `refresh` 由周期任务驱动，CPU 使用率需要两次采样之间的差值才有意义；
/// 状态查询读取缓存，缓存缺失时才直接采样。
pub struct StatsCollector {
    system: Mutex<System>,
    cache: Mutex<HashMap<u32, ProcessStats>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 刷新给定 PID 的采样，已退出的进程从缓存中移除
    pub fn refresh(&self, pids: &[u32]) {
        let mut sys = self.system.lock().unwrap_or_else(|e| e.into_inner());
        let sysinfo_pids: Vec<Pid> = pids.iter().map(|p| Pid::from_u32(*p)).collect();
        sys.refresh_memory();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&sysinfo_pids),
            true,
            ProcessRefreshKind::everything(),
        );

        let fresh: HashMap<u32, ProcessStats> = pids
            .iter()
            .filter_map(|pid| Self::read(&sys, *pid).map(|stats| (*pid, stats)))
            .collect();

        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = fresh;
    }

    /// 采样单个进程；进程已经退出时返回空采样而不是报错
    pub fn collect_stats(&self, pid: u32) -> ProcessStats {
        if pid == 0 {
            return ProcessStats::empty();
        }

        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pid)
        {
            return cached.clone();
        }

        let mut sys = self.system.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_memory();
        sys.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        Self::read(&sys, pid).unwrap_or_default()
    }

    fn read(sys: &System, pid: u32) -> Option<ProcessStats> {
        let process = sys.process(Pid::from_u32(pid))?;
        let total_memory = sys.total_memory();

        Some(ProcessStats {
            cpu_usage: process.cpu_usage(),
            memory_bytes: process.memory(),
            memory_percent: if total_memory > 0 {
                (process.memory() as f32 / total_memory as f32) * 100.0
            } else {
                0.0
            },
            virtual_memory_bytes: process.virtual_memory(),
        })
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
