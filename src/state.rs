use crate::services::Supervisor;
use std::sync::Arc;
use sysinfo::System;

pub struct AppStateInner {
    pub supervisor: Arc<Supervisor>,
    /// metrics 标签使用的主机名
    pub hostname: String,
}

pub type AppState = Arc<AppStateInner>;

pub fn new_state(supervisor: Arc<Supervisor>) -> AppState {
    Arc::new(AppStateInner {
        supervisor,
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
    })
}
