use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{Result, SupervisorError};
use crate::models::ProcessDefinition;

const DUMP_VERSION: u32 = 1;

/// 持久化文件格式：按名称索引的静态定义
#[derive(Debug, Serialize, Deserialize)]
struct DumpFile {
    version: u32,
    processes: BTreeMap<String, ProcessDefinition>,
}

/// 进程定义的持久化存储
///
/// 写入流程：序列化 → 写入同目录下唯一命名的临时文件 → fsync → rename 覆盖 →
/// fsync 父目录。中途崩溃不会破坏上一次保存的内容，并发保存互不干扰。
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, definitions: &[ProcessDefinition]) -> Result<()> {
        let dump = DumpFile {
            version: DUMP_VERSION,
            processes: definitions
                .iter()
                .map(|d| (d.name.clone(), d.clone()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&dump).map_err(persistence)?;

        let dir = self.dir();
        fs::create_dir_all(&dir).map_err(persistence)?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(persistence)?;
        temp.write_all(json.as_bytes()).map_err(persistence)?;
        temp.as_file().sync_all().map_err(persistence)?;
        temp.persist(&self.path).map_err(persistence)?;

        File::open(&dir)
            .and_then(|d| d.sync_all())
            .map_err(persistence)?;

        log::info!(
            "Saved {} process definitions to {}",
            definitions.len(),
            self.path.display()
        );
        Ok(())
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// 文件不存在时返回空集合
    pub fn load(&self) -> Result<Vec<ProcessDefinition>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence(e)),
        };

        let dump: DumpFile = serde_json::from_str(&content).map_err(persistence)?;
        if dump.version != DUMP_VERSION {
            return Err(SupervisorError::Persistence(format!(
                "unsupported dump version {} in {}",
                dump.version,
                self.path.display()
            )));
        }

        Ok(dump
            .processes
            .into_iter()
            .map(|(name, mut definition)| {
                // 以键为准
                definition.name = name;
                definition
            })
            .collect())
    }
}

fn persistence<E: std::fmt::Display>(e: E) -> SupervisorError {
    SupervisorError::Persistence(e.to_string())
}
