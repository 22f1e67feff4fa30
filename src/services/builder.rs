use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use crate::error::{Result, SupervisorError};

/// 源码构建器：把源码路径变成可执行文件路径
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, source_path: &str, name: &str) -> Result<PathBuf>;
}

/// 调用 `go build` 的默认构建器
pub struct GoBuilder {
    go: String,
    bin_dir: PathBuf,
}

impl GoBuilder {
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            go: "go".to_string(),
            bin_dir: bin_dir.into(),
        }
    }

    /// 指定 go 工具链路径
    pub fn with_toolchain(mut self, go: impl Into<String>) -> Self {
        self.go = go.into();
        self
    }
}

#[async_trait]
impl Builder for GoBuilder {
    async fn build(&self, source_path: &str, name: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.bin_dir)
            .await
            .map_err(|e| SupervisorError::Build(format!("create {}: {}", self.bin_dir.display(), e)))?;

        let output_path = self.bin_dir.join(name);
        log::info!("Building '{}' from {} -> {}", name, source_path, output_path.display());

        let output = Command::new(&self.go)
            .arg("build")
            .arg("-o")
            .arg(&output_path)
            .arg(source_path)
            .output()
            .await
            .map_err(|e| SupervisorError::Build(format!("{}: {}", self.go, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SupervisorError::Build(format!(
                "{} ({})",
                stderr.trim(),
                output.status
            )));
        }

        Ok(output_path)
    }
}

/// 已编译好的二进制：源码路径本身就是可执行文件
pub struct PrebuiltBuilder;

#[async_trait]
impl Builder for PrebuiltBuilder {
    async fn build(&self, source_path: &str, _name: &str) -> Result<PathBuf> {
        let path = PathBuf::from(source_path);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(SupervisorError::Build(format!("{} is not a file", source_path))),
            Err(e) => Err(SupervisorError::Build(format!("{}: {}", source_path, e))),
        }
    }
}
