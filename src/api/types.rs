use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::models::StatusSnapshot;

/// `StartGoBin` 请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartBinRequest {
    pub source_path: String,
    pub name: String,
    #[serde(default)]
    pub keep_alive: bool,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub status: String,
    pub message: String,
}

impl OkResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// `DeleteAllProcess` 响应：被删除的名称
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteAllResponse {
    pub status: String,
    pub deleted: Vec<String>,
}

/// `MonitStatus` 响应
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub procs: Vec<StatusSnapshot>,
}
