//! Usage log persisted as `usage.json`

use std::fs;
use std::path::{Path, PathBuf};

use super::write_private;
use crate::auth::error::StoreError;
use crate::auth::usage::{MemoryUsageLog, NewUsage, UsageLog, UsageRecord};

#[derive(Debug)]
pub struct FileUsageLog {
    path: PathBuf,
    inner: MemoryUsageLog,
}

impl FileUsageLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let inner = Self::load(&path)?;
        Ok(Self { path, inner })
    }

    fn load(path: &Path) -> Result<MemoryUsageLog, StoreError> {
        if !path.exists() {
            return Ok(MemoryUsageLog::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl UsageLog for FileUsageLog {
    fn append(&mut self, usage: NewUsage) -> Result<u64, StoreError> {
        let mut next = self.inner.clone();
        let id = next.append(usage)?;
        let content = serde_json::to_string_pretty(&next)?;
        write_private(&self.path, &content)?;
        self.inner = next;
        Ok(id)
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<UsageRecord>, StoreError> {
        self.inner.list_recent(limit)
    }
}
