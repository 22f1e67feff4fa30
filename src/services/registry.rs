use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Result, SupervisorError};
use crate::models::ProcessRecord;

lazy_static! {
    static ref NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").unwrap();
}

/// 名称会出现在 URL 路径和日志文件名中
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(SupervisorError::InvalidName(name.to_string()))
    }
}

/// 进程注册表：名称 → 进程记录
///
/// 读操作返回记录的副本，调用方不会看到写了一半的记录。
#[derive(Default)]
pub struct Registry {
    records: RwLock<HashMap<String, ProcessRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或原地更新同名记录
    pub fn upsert(&self, record: ProcessRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(record.name().to_string(), record);
    }

    pub fn get(&self, name: &str) -> Result<ProcessRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .get(name)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.contains_key(name)
    }

    /// 按名称排序的一致性快照
    pub fn list(&self) -> Vec<ProcessRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<ProcessRecord> = records.values().cloned().collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        list
    }

    pub fn remove(&self, name: &str) -> Result<ProcessRecord> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records
            .remove(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    /// 在写锁内原地修改记录，返回修改后的副本
    pub fn update<F>(&self, name: &str, f: F) -> Result<ProcessRecord>
    where
        F: FnOnce(&mut ProcessRecord),
    {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .get_mut(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        f(record);
        Ok(record.clone())
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
