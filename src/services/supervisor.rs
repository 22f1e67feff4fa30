use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::models::{ProcessDefinition, ProcessRecord, ProcessState, StatusSnapshot};
use crate::services::builder::Builder;
use crate::services::process_control::{self, ExitEvent, Spawned};
use crate::services::registry::{validate_name, Registry};
use crate::services::stats_collector::StatsCollector;
use crate::services::store::Store;

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// 每个进程名对应的运行时槽位
#[derive(Default)]
struct Slot {
    /// 串行化同名进程的所有生命周期操作（包括自动重启）
    lifecycle: tokio::sync::Mutex<()>,
    /// 最近一次启动的子进程
    current: Mutex<Option<Spawned>>,
    /// 已完成的 restart 次数，用于合并并发的 restart 请求
    restart_epoch: AtomicU64,
    last_restart: Mutex<Option<Result<()>>>,
    /// 连续崩溃次数
    crashes: AtomicU32,
}

impl Slot {
    fn current(&self) -> Option<Spawned> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_current(&self, spawned: Option<Spawned>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = spawned;
    }

    fn take_current(&self) -> Option<Spawned> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// 进程监管者
///
/// 唯一可以创建或终止子进程的组件。注册表由它独占；
/// 子进程退出通过 channel 汇总到单一的协调循环处理。
pub struct Supervisor {
    registry: Registry,
    builder: Arc<dyn Builder>,
    store: Store,
    stats: Arc<StatsCollector>,
    config: SupervisorConfig,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    events: mpsc::UnboundedSender<ExitEvent>,
    runtime: Handle,
    generation: AtomicU64,
    shutdown: CancellationToken,
    /// 串行化 save，保证最后写入的是最新快照
    save_lock: tokio::sync::Mutex<()>,
}

impl Supervisor {
    /// 必须在 tokio runtime 内调用；watcher 与后台循环都运行在该 runtime 上
    pub fn new(config: SupervisorConfig, builder: Arc<dyn Builder>) -> Arc<Self> {
        let (events, rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Self {
            registry: Registry::new(),
            builder,
            store: Store::new(config.dump_path()),
            stats: Arc::new(StatsCollector::new()),
            config,
            slots: Mutex::new(HashMap::new()),
            events,
            runtime: Handle::current(),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            save_lock: tokio::sync::Mutex::new(()),
        });

        supervisor
            .runtime
            .spawn(run_exit_loop(Arc::downgrade(&supervisor), rx));
        supervisor
            .runtime
            .spawn(run_sampler_loop(Arc::downgrade(&supervisor)));

        supervisor
    }

    fn slot(&self, name: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(name.to_string()).or_default().clone()
    }

    /// 名称已不在注册表且没有其他调用方持有槽位时移除它
    fn release_slot(&self, name: &str, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // map 中一份，调用方一份
        if Arc::strong_count(slot) <= 2 && !self.registry.contains(name) {
            if let Some(existing) = slots.get(name) {
                if Arc::ptr_eq(existing, slot) {
                    slots.remove(name);
                }
            }
        }
    }

    /// 只为已注册的名称返回槽位
    fn registered_slot(&self, name: &str) -> Result<Arc<Slot>> {
        if !self.registry.contains(name) {
            return Err(SupervisorError::NotFound(name.to_string()));
        }
        Ok(self.slot(name))
    }

    /// 构建源码并启动；同名进程已存在时原地更新定义
    pub async fn start_from_source(
        &self,
        source_path: &str,
        name: &str,
        keep_alive: bool,
        args: Vec<String>,
    ) -> Result<()> {
        validate_name(name)?;
        let slot = self.slot(name);
        let result = {
            let _guard = slot.lifecycle.lock().await;
            self.start_from_source_locked(source_path, name, keep_alive, args, &slot)
                .await
        };
        if result.is_err() {
            self.release_slot(name, &slot);
        }
        result
    }

    async fn start_from_source_locked(
        &self,
        source_path: &str,
        name: &str,
        keep_alive: bool,
        args: Vec<String>,
        slot: &Slot,
    ) -> Result<()> {
        let executable = self.builder.build(source_path, name).await?;
        let definition = ProcessDefinition {
            name: name.to_string(),
            source_path: source_path.to_string(),
            executable_path: executable.to_string_lossy().into_owned(),
            args,
            keep_alive,
        };

        if self.registry.contains(name) {
            self.stop_locked(name, slot).await?;
            self.registry.update(name, |r| r.definition = definition.clone())?;
            log::info!("Updated definition of '{}'", name);
        } else {
            self.registry.upsert(ProcessRecord::new(definition.clone()));
            log::info!("Registered '{}' ({})", name, definition.executable_path);
        }

        slot.crashes.store(0, Ordering::SeqCst);
        self.spawn_locked(slot, &definition, ProcessState::Starting)
            .await
            .map(|_| ())
    }

    /// 启动已注册但未运行的进程
    pub async fn start(&self, name: &str) -> Result<()> {
        let slot = self.registered_slot(name)?;
        let _guard = slot.lifecycle.lock().await;

        let record = self.registry.get(name)?;
        if record.state.has_pid() {
            return Err(SupervisorError::AlreadyRunning(name.to_string()));
        }

        slot.crashes.store(0, Ordering::SeqCst);
        self.spawn_locked(&slot, &record.definition, ProcessState::Starting)
            .await
            .map(|_| ())
    }

    /// 停止（如在运行）后重新拉起，restart_count 加一
    ///
    /// 等待锁期间若已有另一次 restart 完成，直接返回那次的结果。
    pub async fn restart(&self, name: &str) -> Result<()> {
        let slot = self.registered_slot(name)?;
        let seen = slot.restart_epoch.load(Ordering::SeqCst);
        let _guard = slot.lifecycle.lock().await;

        if slot.restart_epoch.load(Ordering::SeqCst) != seen {
            log::debug!("Restart of '{}' coalesced with a concurrent one", name);
            return slot
                .last_restart
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .unwrap_or(Ok(()));
        }

        let result = self.restart_locked(name, &slot).await;
        *slot.last_restart.lock().unwrap_or_else(|e| e.into_inner()) = Some(result.clone());
        slot.restart_epoch.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn restart_locked(&self, name: &str, slot: &Slot) -> Result<()> {
        let record = self.registry.get(name)?;
        self.stop_locked(name, slot).await?;

        slot.crashes.store(0, Ordering::SeqCst);
        self.spawn_locked(slot, &record.definition, ProcessState::Restarting)
            .await?;
        self.registry.update(name, |r| r.restart_count += 1)?;
        log::info!("Restarted '{}'", name);
        Ok(())
    }

    /// 停止进程；已停止时直接成功。会取消挂起的自动重启。
    pub async fn stop(&self, name: &str) -> Result<()> {
        let slot = self.registered_slot(name)?;
        let _guard = slot.lifecycle.lock().await;
        self.registry.get(name)?;
        self.stop_locked(name, &slot).await
    }

    /// 停止并从注册表移除
    pub async fn delete(&self, name: &str) -> Result<()> {
        let slot = self.registered_slot(name)?;
        {
            let _guard = slot.lifecycle.lock().await;
            self.registry.get(name)?;
            self.stop_locked(name, &slot).await?;

            self.registry.update(name, |r| r.state = ProcessState::Deleted)?;
            self.registry.remove(name)?;
            slot.crashes.store(0, Ordering::SeqCst);
        }
        // 仍有调用方在等待这把锁时保留槽位
        self.release_slot(name, &slot);
        log::info!("Deleted '{}'", name);
        Ok(())
    }

    /// 删除所有进程，返回被删除的名称
    pub async fn delete_all(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        let mut first_error = None;

        for record in self.registry.list() {
            let name = record.name().to_string();
            match self.delete(&name).await {
                Ok(()) => deleted.push(name),
                // 并发删除
                Err(SupervisorError::NotFound(_)) => {}
                Err(e) => {
                    log::error!("Failed to delete '{}': {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }

    /// 调用方须持有该名称的 lifecycle 锁
    async fn stop_locked(&self, name: &str, slot: &Slot) -> Result<()> {
        if let Some(mut spawned) = slot.take_current() {
            // 先取消令牌，退出事件与挂起的自动重启都会被忽略
            spawned.token.cancel();
            if let Err(e) = process_control::terminate(
                &mut spawned,
                self.config.grace_period,
                self.config.kill_timeout,
            )
            .await
            {
                let message = e.to_string();
                if matches!(e, SupervisorError::Timeout(_)) {
                    // 令牌已取消，退出事件不会再到达；交给 watcher 回收
                    log::error!("'{}' (PID {}) did not die after SIGKILL", name, spawned.pid);
                    self.registry.update(name, |r| {
                        r.mark_stopped();
                        r.last_error = Some(message);
                    })?;
                } else {
                    self.registry
                        .update(name, |r| r.last_error = Some(message))?;
                    slot.set_current(Some(spawned));
                }
                return Err(e);
            }
            log::info!("Stopped '{}' (PID {})", name, spawned.pid);
        }

        self.registry.update(name, |r| r.mark_stopped())?;
        Ok(())
    }

    /// 调用方须持有该名称的 lifecycle 锁
    async fn spawn_locked(
        &self,
        slot: &Slot,
        definition: &ProcessDefinition,
        transitional: ProcessState,
    ) -> Result<u32> {
        let name = definition.name.as_str();
        self.registry.update(name, |r| {
            r.state = transitional;
            r.pid = 0;
        })?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let spawned = match process_control::spawn(
            &self.runtime,
            definition,
            &self.config.log_dir(),
            generation,
            self.events.clone(),
        )
        .await
        {
            Ok(spawned) => spawned,
            Err(e) => {
                log::error!("Failed to spawn '{}': {}", name, e);
                let message = e.to_string();
                self.registry.update(name, |r| {
                    r.mark_stopped();
                    r.last_error = Some(message);
                })?;
                return Err(e);
            }
        };

        let pid = spawned.pid;
        slot.set_current(Some(spawned));
        self.registry.update(name, |r| {
            r.state = ProcessState::Running;
            r.pid = pid;
            r.started_at = unix_now();
            r.last_error = None;
        })?;

        log::info!("Started '{}' (PID {}, generation {})", name, pid, generation);
        Ok(pid)
    }

    /// 协调循环收到的退出事件
    fn on_exit(self: &Arc<Self>, event: ExitEvent) {
        if event.token.is_cancelled() {
            log::debug!(
                "Exit of '{}' (generation {}) handled by a user action",
                event.name,
                event.generation
            );
            return;
        }
        let supervisor = self.clone();
        self.runtime.spawn(async move {
            supervisor.handle_unexpected_exit(event).await;
        });
    }

    async fn handle_unexpected_exit(&self, event: ExitEvent) {
        let name = event.name.clone();
        let slot = match self.registered_slot(&name) {
            Ok(slot) => slot,
            Err(_) => return,
        };

        let mut crashes = {
            let _guard = slot.lifecycle.lock().await;
            if event.token.is_cancelled() {
                return;
            }
            match slot.current() {
                Some(current) if current.generation == event.generation => {}
                _ => return,
            }

            let crashes = if event.ran_for >= self.config.min_uptime {
                slot.crashes.store(1, Ordering::SeqCst);
                1
            } else {
                slot.crashes.fetch_add(1, Ordering::SeqCst) + 1
            };

            let record = match self.registry.update(&name, |r| {
                r.last_exit_code = event.exit_code;
                r.pid = 0;
                r.state = if r.definition.keep_alive {
                    ProcessState::Restarting
                } else {
                    ProcessState::Stopped
                };
            }) {
                Ok(record) => record,
                Err(_) => return,
            };

            log::warn!(
                "'{}' exited unexpectedly with {:?}",
                name,
                event.exit_code
            );
            if !record.definition.keep_alive {
                slot.set_current(None);
                return;
            }
            crashes
        };

        loop {
            if self.config.max_restarts > 0 && crashes > self.config.max_restarts {
                let _guard = slot.lifecycle.lock().await;
                if event.token.is_cancelled() {
                    return;
                }
                log::error!(
                    "'{}' crashed {} times in a row, giving up",
                    name,
                    crashes
                );
                slot.set_current(None);
                let _ = self.registry.update(&name, |r| {
                    r.mark_stopped();
                    r.last_error = Some("restart limit reached".to_string());
                });
                return;
            }

            let delay = self.config.backoff(crashes);
            log::info!("Restarting '{}' in {:?}", name, delay);
            tokio::select! {
                _ = event.token.cancelled() => return,
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let _guard = slot.lifecycle.lock().await;
            if event.token.is_cancelled() {
                return;
            }
            let record = match self.registry.get(&name) {
                Ok(record) => record,
                Err(_) => return,
            };

            match self
                .spawn_locked(&slot, &record.definition, ProcessState::Restarting)
                .await
            {
                Ok(_) => {
                    let _ = self.registry.update(&name, |r| r.restart_count += 1);
                    return;
                }
                Err(e) => {
                    // 保持旧令牌可取消，继续退避重试
                    let message = e.to_string();
                    let _ = self.registry.update(&name, |r| {
                        r.state = ProcessState::Restarting;
                        r.last_error = Some(message);
                    });
                    crashes = slot.crashes.fetch_add(1, Ordering::SeqCst) + 1;
                }
            }
        }
    }

    /// `GetProcByName`：不存在时返回 None
    pub fn get(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.registry.get(name).ok().map(|r| r.detail(unix_now()))
    }

    pub fn record(&self, name: &str) -> Result<ProcessRecord> {
        self.registry.get(name)
    }

    /// `MonitStatus`：所有进程的状态快照
    pub fn status(&self) -> Vec<StatusSnapshot> {
        let now = unix_now();
        self.registry
            .list()
            .into_iter()
            .map(|record| {
                let stats = if record.state == ProcessState::Running {
                    self.stats.collect_stats(record.pid)
                } else {
                    Default::default()
                };
                StatusSnapshot {
                    name: record.definition.name.clone(),
                    pid: record.pid,
                    state: record.state,
                    uptime: record.uptime(now),
                    restart_count: record.restart_count,
                    cpu_usage: stats.cpu_usage,
                    memory_bytes: stats.memory_bytes,
                    memory_percent: stats.memory_percent,
                    virtual_memory_bytes: stats.virtual_memory_bytes,
                }
            })
            .collect()
    }

    /// 持久化所有进程的静态定义
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let definitions: Vec<ProcessDefinition> = self
            .registry
            .list()
            .into_iter()
            .map(|r| r.definition)
            .collect();
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&definitions))
            .await
            .map_err(|e| SupervisorError::Persistence(e.to_string()))?
    }

    /// 载入上次保存的定义（状态为 Stopped），`resurrect` 时逐个启动
    pub async fn restore(&self, resurrect: bool) -> Result<usize> {
        let store = self.store.clone();
        let definitions = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| SupervisorError::Persistence(e.to_string()))??;

        let mut restored = Vec::new();
        for definition in definitions {
            if let Err(e) = validate_name(&definition.name) {
                log::warn!("Skipping saved process: {}", e);
                continue;
            }
            if self.registry.contains(&definition.name) {
                continue;
            }
            restored.push(definition.name.clone());
            self.registry.upsert(ProcessRecord::new(definition));
        }
        log::info!(
            "Restored {} process definitions from {}",
            restored.len(),
            self.store.path().display()
        );

        if resurrect {
            for name in &restored {
                if let Err(e) = self.start(name).await {
                    log::error!("Failed to resurrect '{}': {}", name, e);
                }
            }
        }
        Ok(restored.len())
    }

    /// 守护进程退出前停止所有子进程（保留注册记录）
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for record in self.registry.list() {
            if let Err(e) = self.stop(record.name()).await {
                log::error!("Failed to stop '{}' during shutdown: {}", record.name(), e);
            }
        }
    }

    fn running_pids(&self) -> Vec<u32> {
        self.registry
            .list()
            .into_iter()
            .filter(|r| r.state == ProcessState::Running && r.pid > 0)
            .map(|r| r.pid)
            .collect()
    }
}

async fn run_exit_loop(weak: Weak<Supervisor>, mut rx: mpsc::UnboundedReceiver<ExitEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(supervisor) = weak.upgrade() else {
            break;
        };
        if supervisor.shutdown.is_cancelled() {
            continue;
        }
        supervisor.on_exit(event);
    }
    log::debug!("Exit monitoring loop finished");
}

async fn run_sampler_loop(weak: Weak<Supervisor>) {
    let (interval, shutdown) = match weak.upgrade() {
        Some(s) => (s.config.sample_interval, s.shutdown.clone()),
        None => return,
    };
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(supervisor) = weak.upgrade() else {
                    break;
                };
                let pids = supervisor.running_pids();
                let stats = supervisor.stats.clone();
                drop(supervisor);
                if let Err(e) = tokio::task::spawn_blocking(move || stats.refresh(&pids)).await {
                    log::warn!("Resource sampling failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration;

    /// 直接返回固定可执行文件的构建器
    struct FakeBuilder {
        executable: Option<PathBuf>,
    }

    #[async_trait]
    impl Builder for FakeBuilder {
        async fn build(&self, source_path: &str, _name: &str) -> Result<PathBuf> {
            self.executable
                .clone()
                .ok_or_else(|| SupervisorError::Build(format!("cannot build {}", source_path)))
        }
    }

    fn config(home: &std::path::Path) -> SupervisorConfig {
        SupervisorConfig {
            home: home.to_path_buf(),
            grace_period: Duration::from_secs(2),
            kill_timeout: Duration::from_secs(2),
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_millis(200),
            max_restarts: 0,
            min_uptime: Duration::from_secs(10),
            sample_interval: Duration::from_millis(200),
        }
    }

    fn supervisor_with(config: SupervisorConfig, executable: &str) -> Arc<Supervisor> {
        Supervisor::new(
            config,
            Arc::new(FakeBuilder {
                executable: Some(PathBuf::from(executable)),
            }),
        )
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn wait_until<F>(supervisor: &Supervisor, name: &str, timeout: Duration, pred: F) -> ProcessRecord
    where
        F: Fn(&ProcessRecord) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = supervisor.record(name).unwrap();
            if pred(&record) {
                return record;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("condition not reached for '{}': {:?}", name, record);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_unknown_name_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");

        assert!(sup.get("ghost").is_none());
        let not_found = SupervisorError::NotFound("ghost".to_string());
        assert_eq!(sup.start("ghost").await, Err(not_found.clone()));
        assert_eq!(sup.restart("ghost").await, Err(not_found.clone()));
        assert_eq!(sup.stop("ghost").await, Err(not_found.clone()));
        assert_eq!(sup.delete("ghost").await, Err(not_found));
        assert!(sup.status().is_empty());
    }

    #[tokio::test]
    async fn test_start_from_source_runs_process() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");

        sup.start_from_source("./cmd/worker", "worker1", false, args(&["30"]))
            .await
            .unwrap();

        let record = sup.record("worker1").unwrap();
        assert_eq!(record.state, ProcessState::Running);
        assert!(record.pid > 0);
        assert!(process_control::is_alive(record.pid));
        assert_eq!(record.definition.source_path, "./cmd/worker");
        assert_eq!(record.definition.executable_path, "/bin/sleep");

        let detail = sup.get("worker1").unwrap();
        assert_eq!(detail["state"], "running");
        assert_eq!(detail["pid"], record.pid.to_string());

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_error_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(config(dir.path()), Arc::new(FakeBuilder { executable: None }));

        let err = sup
            .start_from_source("./broken", "broken", true, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Build(_)));
        assert!(sup.get("broken").is_none());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        let err = sup
            .start_from_source("./cmd", "../escape", false, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_spawn_error_leaves_stopped_record() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/nonexistent/worker");

        let err = sup
            .start_from_source("./cmd/worker", "worker1", true, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn(_)));

        let record = sup.record("worker1").unwrap();
        assert_eq!(record.state, ProcessState::Stopped);
        assert_eq!(record.pid, 0);
        assert!(record.last_error.is_some());
    }

    #[tokio::test]
    async fn test_start_on_running_is_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        sup.start_from_source("./cmd", "api", false, args(&["30"]))
            .await
            .unwrap();
        let pid = sup.record("api").unwrap().pid;

        assert_eq!(
            sup.start("api").await,
            Err(SupervisorError::AlreadyRunning("api".to_string()))
        );
        // 原进程不受影响
        assert_eq!(sup.record("api").unwrap().pid, pid);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_start_keeps_definition_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        sup.start_from_source("./cmd", "api", false, args(&["30"]))
            .await
            .unwrap();
        let first = sup.record("api").unwrap();

        sup.stop("api").await.unwrap();
        let stopped = sup.record("api").unwrap();
        assert_eq!(stopped.state, ProcessState::Stopped);
        assert_eq!(stopped.pid, 0);
        assert!(!process_control::is_alive(first.pid));

        // 重复 stop 是安全的
        sup.stop("api").await.unwrap();

        sup.start("api").await.unwrap();
        let second = sup.record("api").unwrap();
        assert_eq!(second.state, ProcessState::Running);
        assert_eq!(second.definition, first.definition);
        assert_eq!(second.restart_count, 0);
        assert_ne!(second.pid, first.pid);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_restart_spawns_once() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        sup.start_from_source("./cmd", "api", false, args(&["30"]))
            .await
            .unwrap();
        let before = sup.record("api").unwrap();

        let (a, b, c, d) = tokio::join!(
            sup.restart("api"),
            sup.restart("api"),
            sup.restart("api"),
            sup.restart("api"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok());

        let after = sup.record("api").unwrap();
        assert_eq!(after.state, ProcessState::Running);
        assert_eq!(after.restart_count, 1);
        assert_ne!(after.pid, before.pid);
        assert!(process_control::is_alive(after.pid));

        // 之后的 restart 不再被合并
        sup.restart("api").await.unwrap();
        assert_eq!(sup.record("api").unwrap().restart_count, 2);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_stopped_process() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        sup.start_from_source("./cmd", "api", false, args(&["30"]))
            .await
            .unwrap();
        sup.stop("api").await.unwrap();

        sup.restart("api").await.unwrap();
        let record = sup.record("api").unwrap();
        assert_eq!(record.state, ProcessState::Running);
        assert_eq!(record.restart_count, 1);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_keep_alive_respawns_once_after_kill() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        sup.start_from_source("./cmd", "worker1", true, args(&["30"]))
            .await
            .unwrap();
        let original = sup.record("worker1").unwrap().pid;

        process_control::send_signal(original, nix::sys::signal::Signal::SIGKILL).unwrap();

        let record = wait_until(&sup, "worker1", Duration::from_secs(5), |r| {
            r.state == ProcessState::Running && r.pid != original
        })
        .await;
        assert_eq!(record.restart_count, 1);
        assert_eq!(record.last_exit_code, Some(128 + 9));

        let status = sup.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].name, "worker1");
        assert_eq!(status[0].state, ProcessState::Running);
        assert_eq!(status[0].restart_count, 1);

        // 只重启一次
        tokio::time::sleep(Duration::from_millis(400)).await;
        let settled = sup.record("worker1").unwrap();
        assert_eq!(settled.restart_count, 1);
        assert_eq!(settled.pid, record.pid);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_exit_without_keep_alive_stops() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sh");
        sup.start_from_source("./cmd", "oneshot", false, args(&["-c", "exit 3"]))
            .await
            .unwrap();

        let record = wait_until(&sup, "oneshot", Duration::from_secs(5), |r| {
            r.state == ProcessState::Stopped
        })
        .await;
        assert_eq!(record.last_exit_code, Some(3));
        assert_eq!(record.pid, 0);
        assert_eq!(record.restart_count, 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_restart() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(
            SupervisorConfig {
                backoff_base: Duration::from_millis(500),
                backoff_max: Duration::from_millis(500),
                ..config(dir.path())
            },
            "/bin/sleep",
        );
        sup.start_from_source("./cmd", "worker1", true, args(&["30"]))
            .await
            .unwrap();
        let pid = sup.record("worker1").unwrap().pid;
        process_control::send_signal(pid, nix::sys::signal::Signal::SIGKILL).unwrap();

        wait_until(&sup, "worker1", Duration::from_secs(5), |r| {
            r.state == ProcessState::Restarting
        })
        .await;
        sup.stop("worker1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        let record = sup.record("worker1").unwrap();
        assert_eq!(record.state, ProcessState::Stopped);
        assert_eq!(record.pid, 0);
        assert_eq!(record.restart_count, 0);
    }

    #[tokio::test]
    async fn test_restart_limit_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(
            SupervisorConfig {
                max_restarts: 2,
                backoff_base: Duration::from_millis(20),
                backoff_max: Duration::from_millis(40),
                ..config(dir.path())
            },
            "/bin/sh",
        );
        sup.start_from_source("./cmd", "crashy", true, args(&["-c", "exit 1"]))
            .await
            .unwrap();

        let record = wait_until(&sup, "crashy", Duration::from_secs(5), |r| {
            r.last_error.as_deref() == Some("restart limit reached")
        })
        .await;
        assert_eq!(record.state, ProcessState::Stopped);
        assert_eq!(record.restart_count, 2);
        assert_eq!(record.last_exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_delete_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        sup.start_from_source("./cmd", "worker1", true, args(&["30"]))
            .await
            .unwrap();
        let pid = sup.record("worker1").unwrap().pid;

        sup.delete("worker1").await.unwrap();
        assert!(!process_control::is_alive(pid));
        assert!(sup.get("worker1").is_none());
        assert!(sup.status().is_empty());

        // keep_alive 不会把已删除的进程拉起来
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(sup.get("worker1").is_none());
        assert_eq!(
            sup.delete("worker1").await,
            Err(SupervisorError::NotFound("worker1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_delete_all() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        for name in ["a", "b", "c"] {
            sup.start_from_source("./cmd", name, false, args(&["30"]))
                .await
                .unwrap();
        }

        let deleted = sup.delete_all().await.unwrap();
        assert_eq!(deleted, vec!["a", "b", "c"]);
        assert!(sup.status().is_empty());
    }

    #[tokio::test]
    async fn test_start_from_source_updates_existing() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        sup.start_from_source("./cmd", "api", false, args(&["30"]))
            .await
            .unwrap();
        sup.restart("api").await.unwrap();
        let old_pid = sup.record("api").unwrap().pid;

        sup.start_from_source("./cmd/v2", "api", true, args(&["60"]))
            .await
            .unwrap();
        let record = sup.record("api").unwrap();
        assert_eq!(sup.status().len(), 1);
        assert_eq!(record.definition.source_path, "./cmd/v2");
        assert_eq!(record.definition.args, args(&["60"]));
        assert!(record.definition.keep_alive);
        assert_eq!(record.restart_count, 1);
        assert_ne!(record.pid, old_pid);
        assert!(!process_control::is_alive(old_pid));

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_save_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        sup.start_from_source("./cmd/a", "a", true, args(&["30"]))
            .await
            .unwrap();
        sup.start_from_source("./cmd/b", "b", false, args(&["31"]))
            .await
            .unwrap();
        sup.restart("a").await.unwrap();
        sup.save().await.unwrap();
        let saved: Vec<ProcessDefinition> = ["a", "b"]
            .iter()
            .map(|n| sup.record(n).unwrap().definition)
            .collect();
        sup.shutdown().await;

        let fresh = supervisor_with(config(dir.path()), "/bin/sleep");
        assert_eq!(fresh.restore(false).await.unwrap(), 2);
        for definition in &saved {
            let record = fresh.record(&definition.name).unwrap();
            assert_eq!(&record.definition, definition);
            assert_eq!(record.state, ProcessState::Stopped);
            assert_eq!(record.restart_count, 0);
        }

        let resurrected = supervisor_with(config(dir.path()), "/bin/sleep");
        resurrected.restore(true).await.unwrap();
        assert_eq!(resurrected.record("a").unwrap().state, ProcessState::Running);
        assert_eq!(resurrected.record("b").unwrap().state, ProcessState::Running);
        resurrected.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_reports_resources() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        sup.start_from_source("./cmd", "api", false, args(&["30"]))
            .await
            .unwrap();
        sup.start_from_source("./cmd", "idle", false, args(&["30"]))
            .await
            .unwrap();
        sup.stop("idle").await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = sup.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].name, "api");
        assert!(status[0].memory_bytes > 0);
        assert!(status[0].virtual_memory_bytes >= status[0].memory_bytes);
        assert!(status[0].memory_percent > 0.0);
        assert_eq!(status[1].name, "idle");
        assert_eq!(status[1].state, ProcessState::Stopped);
        assert_eq!(status[1].memory_bytes, 0);
        assert_eq!(status[1].uptime, 0);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_slots_released_after_delete_and_failed_build() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        sup.start_from_source("./cmd", "worker1", false, args(&["30"]))
            .await
            .unwrap();
        sup.delete("worker1").await.unwrap();
        assert!(!sup.slots.lock().unwrap().contains_key("worker1"));

        let failing = Supervisor::new(
            config(dir.path()),
            Arc::new(FakeBuilder { executable: None }),
        );
        for _ in 0..3 {
            assert!(failing
                .start_from_source("./cmd", "broken", false, Vec::new())
                .await
                .is_err());
        }
        assert!(failing.slots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_timeout_marks_record_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.grace_period = Duration::from_millis(100);
        cfg.kill_timeout = Duration::from_millis(100);
        let sup = supervisor_with(cfg, "/bin/sleep");
        sup.start_from_source("./cmd", "stubborn", true, args(&["30"]))
            .await
            .unwrap();

        // 换成一个永远等不到退出通知的句柄
        let slot = sup.slot("stubborn");
        let real = slot.current().unwrap();
        let (stuck, _never_exits) = Spawned::detached(real.pid, real.generation, real.token.clone());
        slot.set_current(Some(stuck));

        let err = sup.stop("stubborn").await.unwrap_err();
        assert!(matches!(err, SupervisorError::Timeout(_)));
        let record = sup.record("stubborn").unwrap();
        assert_eq!(record.state, ProcessState::Stopped);
        assert_eq!(record.pid, 0);
        assert!(record.last_error.is_some());

        sup.start("stubborn").await.unwrap();
        let record = sup.record("stubborn").unwrap();
        assert_eq!(record.state, ProcessState::Running);
        assert_ne!(record.pid, real.pid);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_saves() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with(config(dir.path()), "/bin/sleep");
        for i in 0..20 {
            sup.start_from_source("./cmd", &format!("w{}", i), false, args(&["30"]))
                .await
                .unwrap();
        }

        let results = save_concurrently(&sup, 8).await;
        assert!(results.into_iter().all(|r| r.is_ok()));
        assert_eq!(Store::new(dir.path().join("dump.json")).load().unwrap().len(), 20);

        sup.shutdown().await;
    }

    async fn save_concurrently(sup: &Arc<Supervisor>, n: usize) -> Vec<Result<()>> {
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let sup = sup.clone();
                tokio::spawn(async move { sup.save().await })
            })
            .collect();
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }
}
