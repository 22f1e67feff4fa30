use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::{self, OpenOptions};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SupervisorError};
use crate::models::ProcessDefinition;

/// 子进程退出事件，由 watcher 任务发往 supervisor 的协调循环
#[derive(Debug)]
pub struct ExitEvent {
    pub name: String,
    pub generation: u64,
    pub exit_code: Option<i32>,
    /// 本次运行持续的时长
    pub ran_for: Duration,
    /// 启动时分配的取消令牌；已取消说明用户操作接管了这个进程
    pub token: CancellationToken,
}

/// 已启动的子进程句柄
#[derive(Debug, Clone)]
pub struct Spawned {
    pub pid: u32,
    pub generation: u64,
    pub token: CancellationToken,
    exited: watch::Receiver<bool>,
}

impl Spawned {
    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// 等待子进程退出（被 watcher 回收）
    pub async fn wait_exit(&mut self) {
        // sender 被丢弃同样意味着 watcher 已结束
        let _ = self.exited.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
impl Spawned {
    /// 不经过 watcher 的句柄，退出状态由返回的 sender 控制
    pub(crate) fn detached(
        pid: u32,
        generation: u64,
        token: CancellationToken,
    ) -> (Self, watch::Sender<bool>) {
        let (tx, exited) = watch::channel(false);
        (
            Self {
                pid,
                generation,
                token,
                exited,
            },
            tx,
        )
    }
}

/// 在 supervisor 所在的 runtime 上启动子进程
///
/// watcher 任务持有 `Child`，负责 wait 回收并上报 `ExitEvent`；
/// 调用方在 spawn 成功或失败后立即返回，不等待进程退出。
pub async fn spawn(
    runtime: &Handle,
    definition: &ProcessDefinition,
    log_dir: &Path,
    generation: u64,
    events: mpsc::UnboundedSender<ExitEvent>,
) -> Result<Spawned> {
    let (stdout, stderr) = open_logs(log_dir, &definition.name)?;

    let mut command = Command::new(&definition.executable_path);
    command
        .args(&definition.args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true);

    let name = definition.name.clone();
    let token = CancellationToken::new();
    let watcher_token = token.clone();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = watch::channel(false);

    runtime.spawn(async move {
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = ready_tx.send(Err(SupervisorError::Spawn(e.to_string())));
                return;
            }
        };
        let started = Instant::now();
        let pid = child.id().unwrap_or(0);
        let _ = ready_tx.send(Ok(pid));

        let exit_code = match child.wait().await {
            Ok(status) => status.code().or_else(|| status.signal().map(|s| 128 + s)),
            Err(e) => {
                log::error!("Failed to wait for '{}' (PID {}): {}", name, pid, e);
                None
            }
        };
        log::debug!("'{}' (PID {}) exited with {:?}", name, pid, exit_code);

        exit_tx.send_replace(true);
        let _ = events.send(ExitEvent {
            name,
            generation,
            exit_code,
            ran_for: started.elapsed(),
            token: watcher_token,
        });
    });

    let pid = ready_rx
        .await
        .map_err(|_| SupervisorError::Spawn("watcher task dropped".to_string()))??;

    Ok(Spawned {
        pid,
        generation,
        token,
        exited: exit_rx,
    })
}

/// 先 SIGTERM，宽限期后升级为 SIGKILL
pub async fn terminate(
    spawned: &mut Spawned,
    grace_period: Duration,
    kill_timeout: Duration,
) -> Result<()> {
    if spawned.has_exited() {
        return Ok(());
    }

    send_signal(spawned.pid, Signal::SIGTERM)?;
    if tokio::time::timeout(grace_period, spawned.wait_exit()).await.is_ok() {
        return Ok(());
    }

    log::warn!(
        "PID {} did not exit within {:?}, sending SIGKILL",
        spawned.pid,
        grace_period
    );
    send_signal(spawned.pid, Signal::SIGKILL)?;
    tokio::time::timeout(kill_timeout, spawned.wait_exit())
        .await
        .map_err(|_| {
            SupervisorError::Timeout(format!(
                "PID {} still alive {:?} after SIGKILL",
                spawned.pid, kill_timeout
            ))
        })
}

/// 进程已经不存在时视为成功
pub fn send_signal(pid: u32, sig: Signal) -> Result<()> {
    let raw = i32::try_from(pid)
        .ok()
        .filter(|p| *p > 1)
        .ok_or_else(|| SupervisorError::Signal(format!("refusing to signal PID {}", pid)))?;

    match signal::kill(Pid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(SupervisorError::Signal(format!(
            "failed to send {} to PID {}: {}",
            sig, pid, e
        ))),
    }
}

/// 检查 PID 是否存活（signal 0）
pub fn is_alive(pid: u32) -> bool {
    i32::try_from(pid)
        .map(|raw| signal::kill(Pid::from_raw(raw), None).is_ok())
        .unwrap_or(false)
}

fn open_logs(log_dir: &Path, name: &str) -> Result<(Stdio, Stdio)> {
    fs::create_dir_all(log_dir).map_err(|e| {
        SupervisorError::Spawn(format!("create log dir {}: {}", log_dir.display(), e))
    })?;

    let open = |suffix: &str| {
        let path = log_dir.join(format!("{}-{}.log", name, suffix));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map(Stdio::from)
            .map_err(|e| SupervisorError::Spawn(format!("open {}: {}", path.display(), e)))
    };

    Ok((open("out")?, open("err")?))
}
