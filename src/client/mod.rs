use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::api::types::{
    DeleteAllResponse, ErrorResponse, OkResponse, StartBinRequest, StatusResponse,
};
use crate::error::{Result, SupervisorError};
use crate::models::StatusSnapshot;
use crate::services::registry::validate_name;

/// 单次请求的上限，构建 Go 程序可能较慢
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// 远程 procvisor 服务的客户端
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: Client,
    base_url: Url,
}

impl RemoteClient {
    /// 建立连接并探测 /health，超时或不可达返回 Transport 错误
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&normalize(addr))
            .map_err(|e| SupervisorError::Transport(format!("invalid address '{}': {}", addr, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SupervisorError::Transport(format!("invalid address '{}'", addr)));
        }
        let http = Client::builder()
            .connect_timeout(timeout)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let resp = http
            .get(join(&base_url, &["health"]))
            .timeout(timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SupervisorError::Transport(format!(
                "health check on {} returned {}",
                base_url,
                resp.status()
            )));
        }

        log::debug!("Connected to {}", base_url);
        Ok(Self { http, base_url })
    }

    pub async fn start_go_bin(
        &self,
        source_path: &str,
        name: &str,
        keep_alive: bool,
        args: Vec<String>,
    ) -> Result<()> {
        let body = StartBinRequest {
            source_path: source_path.to_string(),
            name: name.to_string(),
            keep_alive,
            args,
        };
        let resp = self
            .http
            .post(join(&self.base_url, &["api", "process"]))
            .json(&body)
            .send()
            .await?;
        decode::<OkResponse>(resp).await.map(|_| ())
    }

    pub async fn start_process(&self, name: &str) -> Result<()> {
        self.action(name, "start").await
    }

    pub async fn restart_process(&self, name: &str) -> Result<()> {
        self.action(name, "restart").await
    }

    pub async fn stop_process(&self, name: &str) -> Result<()> {
        self.action(name, "stop").await
    }

    pub async fn delete_process(&self, name: &str) -> Result<()> {
        let url = self.process_url(name, None)?;
        let resp = self.http.delete(url).send().await?;
        decode::<OkResponse>(resp).await.map(|_| ())
    }

    /// 停止并删除全部进程，返回被删除的名称
    pub async fn delete_all(&self) -> Result<Vec<String>> {
        let resp = self
            .http
            .delete(join(&self.base_url, &["api", "process"]))
            .send()
            .await?;
        decode::<DeleteAllResponse>(resp).await.map(|r| r.deleted)
    }

    /// 未知名称返回空 map
    pub async fn get_proc_by_name(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let url = match self.process_url(name, None) {
            Ok(url) => url,
            Err(SupervisorError::NotFound(_)) => return Ok(BTreeMap::new()),
            Err(e) => return Err(e),
        };
        let resp = self.http.get(url).send().await?;
        decode(resp).await
    }

    pub async fn monit_status(&self) -> Result<Vec<StatusSnapshot>> {
        let resp = self
            .http
            .get(join(&self.base_url, &["api", "status"]))
            .send()
            .await?;
        decode::<StatusResponse>(resp).await.map(|s| s.procs)
    }

    pub async fn save(&self) -> Result<()> {
        let resp = self
            .http
            .post(join(&self.base_url, &["api", "save"]))
            .send()
            .await?;
        decode::<OkResponse>(resp).await.map(|_| ())
    }

    async fn action(&self, name: &str, verb: &str) -> Result<()> {
        let url = self.process_url(name, Some(verb))?;
        let resp = self.http.post(url).send().await?;
        decode::<OkResponse>(resp).await.map(|_| ())
    }

    /// `/api/process/{name}[/{verb}]`
    ///
    /// 不合法的名称不可能被注册，直接视为 NotFound，不会拼出指向其他进程的路径。
    fn process_url(&self, name: &str, verb: Option<&str>) -> Result<Url> {
        if validate_name(name).is_err() {
            return Err(SupervisorError::NotFound(name.to_string()));
        }
        let mut segments = vec!["api", "process", name];
        segments.extend(verb);
        Ok(join(&self.base_url, &segments))
    }
}

/// 逐段追加路径，每段单独做百分号编码
fn join(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn normalize(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

/// 成功时解析响应体，失败时还原服务端的类型化错误
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }

    let text = resp.text().await?;
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(err) => Err(SupervisorError::from_kind(err.kind, err.message)),
        Err(_) => Err(SupervisorError::Transport(format!(
            "unexpected response {}: {}",
            status, text
        ))),
    }
}
