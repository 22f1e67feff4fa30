use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误类别，同时作为协议层的错误编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyRunning,
    InvalidName,
    Build,
    Spawn,
    Timeout,
    Persistence,
    Signal,
    Transport,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("process '{0}' not found")]
    NotFound(String),

    #[error("process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("invalid process name '{0}'")]
    InvalidName(String),

    #[error("build failed: {0}")]
    Build(String),

    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("signal delivery failed: {0}")]
    Signal(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

impl SupervisorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SupervisorError::NotFound(_) => ErrorKind::NotFound,
            SupervisorError::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            SupervisorError::InvalidName(_) => ErrorKind::InvalidName,
            SupervisorError::Build(_) => ErrorKind::Build,
            SupervisorError::Spawn(_) => ErrorKind::Spawn,
            SupervisorError::Timeout(_) => ErrorKind::Timeout,
            SupervisorError::Persistence(_) => ErrorKind::Persistence,
            SupervisorError::Signal(_) => ErrorKind::Signal,
            SupervisorError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// 错误携带的原始信息（不含前缀）
    pub fn detail(&self) -> &str {
        match self {
            SupervisorError::NotFound(s)
            | SupervisorError::AlreadyRunning(s)
            | SupervisorError::InvalidName(s)
            | SupervisorError::Build(s)
            | SupervisorError::Spawn(s)
            | SupervisorError::Timeout(s)
            | SupervisorError::Persistence(s)
            | SupervisorError::Signal(s)
            | SupervisorError::Transport(s) => s,
        }
    }

    /// 由协议层的错误编码还原为类型化错误
    pub fn from_kind(kind: ErrorKind, detail: String) -> Self {
        match kind {
            ErrorKind::NotFound => SupervisorError::NotFound(detail),
            ErrorKind::AlreadyRunning => SupervisorError::AlreadyRunning(detail),
            ErrorKind::InvalidName => SupervisorError::InvalidName(detail),
            ErrorKind::Build => SupervisorError::Build(detail),
            ErrorKind::Spawn => SupervisorError::Spawn(detail),
            ErrorKind::Timeout => SupervisorError::Timeout(detail),
            ErrorKind::Persistence => SupervisorError::Persistence(detail),
            ErrorKind::Signal => SupervisorError::Signal(detail),
            ErrorKind::Transport => SupervisorError::Transport(detail),
        }
    }
}

impl From<reqwest::Error> for SupervisorError {
    fn from(e: reqwest::Error) -> Self {
        SupervisorError::Transport(e.to_string())
    }
}
