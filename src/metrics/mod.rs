use prometheus::{
    register_gauge_vec_with_registry, register_gauge_with_registry, Encoder, Gauge, GaugeVec,
    Opts, Registry, TextEncoder,
};
use lazy_static::lazy_static;
use std::sync::Arc;

use crate::models::{ProcessState, StatusSnapshot};

pub struct MetricsRegistry {
    registry: Registry,

    pub managed_processes: Gauge,
    pub process_up: GaugeVec,
    pub process_pid_info: GaugeVec,
    pub process_cpu_usage: GaugeVec,
    pub process_memory_bytes: GaugeVec,
    pub process_memory_percent: GaugeVec,
    pub process_virtual_memory_bytes: GaugeVec,
    pub process_restart_count: GaugeVec,
    pub process_uptime_seconds: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        // 定义通用的标签
        let common_labels = &["name", "hostname"];

        let managed_processes = register_gauge_with_registry!(
            Opts::new("procvisor_managed_processes", "Number of managed processes"),
            registry
        ).unwrap();

        let process_up = register_gauge_vec_with_registry!(
            Opts::new("procvisor_process_up", "Process is running (1) or not (0)"),
            common_labels,
            registry
        ).unwrap();

        let process_pid_info = register_gauge_vec_with_registry!(
            Opts::new("procvisor_process_pid_info", "Process PID information"),
            &["name", "pid", "state", "hostname"],
            registry
        ).unwrap();

        let process_cpu_usage = register_gauge_vec_with_registry!(
            Opts::new("procvisor_process_cpu_usage_percent", "Process CPU usage percentage"),
            common_labels,
            registry
        ).unwrap();

        let process_memory_bytes = register_gauge_vec_with_registry!(
            Opts::new("procvisor_process_memory_bytes", "Process resident memory in bytes"),
            common_labels,
            registry
        ).unwrap();

        let process_memory_percent = register_gauge_vec_with_registry!(
            Opts::new("procvisor_process_memory_percent", "Process memory usage percentage"),
            common_labels,
            registry
        ).unwrap();

        let process_virtual_memory_bytes = register_gauge_vec_with_registry!(
            Opts::new("procvisor_process_virtual_memory_bytes", "Process virtual memory in bytes"),
            common_labels,
            registry
        ).unwrap();

        let process_restart_count = register_gauge_vec_with_registry!(
            Opts::new("procvisor_process_restarts", "Supervisor initiated restarts"),
            common_labels,
            registry
        ).unwrap();

        let process_uptime_seconds = register_gauge_vec_with_registry!(
            Opts::new("procvisor_process_uptime_seconds", "Seconds since the process was started"),
            common_labels,
            registry
        ).unwrap();

        Self {
            registry,
            managed_processes,
            process_up,
            process_pid_info,
            process_cpu_usage,
            process_memory_bytes,
            process_memory_percent,
            process_virtual_memory_bytes,
            process_restart_count,
            process_uptime_seconds,
        }
    }

    /// 用最新快照替换全部指标，已删除的进程不会残留
    pub fn update(&self, snapshots: &[StatusSnapshot], hostname: &str) {
        self.process_up.reset();
        self.process_pid_info.reset();
        self.process_cpu_usage.reset();
        self.process_memory_bytes.reset();
        self.process_memory_percent.reset();
        self.process_virtual_memory_bytes.reset();
        self.process_restart_count.reset();
        self.process_uptime_seconds.reset();

        self.managed_processes.set(snapshots.len() as f64);

        for snapshot in snapshots {
            let labels = &[snapshot.name.as_str(), hostname];
            let running = snapshot.state == ProcessState::Running;

            self.process_up
                .with_label_values(labels)
                .set(if running { 1.0 } else { 0.0 });
            self.process_pid_info
                .with_label_values(&[
                    snapshot.name.as_str(),
                    &snapshot.pid.to_string(),
                    snapshot.state.as_str(),
                    hostname,
                ])
                .set(1.0);
            self.process_restart_count
                .with_label_values(labels)
                .set(snapshot.restart_count as f64);
            self.process_uptime_seconds
                .with_label_values(labels)
                .set(snapshot.uptime as f64);

            // 只有进程运行时才输出资源 metrics
            if running {
                self.process_cpu_usage
                    .with_label_values(labels)
                    .set(snapshot.cpu_usage as f64);
                self.process_memory_bytes
                    .with_label_values(labels)
                    .set(snapshot.memory_bytes as f64);
                self.process_memory_percent
                    .with_label_values(labels)
                    .set(snapshot.memory_percent as f64);
                self.process_virtual_memory_bytes
                    .with_label_values(labels)
                    .set(snapshot.virtual_memory_bytes as f64);
            }
        }
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::new());
}
