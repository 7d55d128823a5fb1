//! Append-only log of token usage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StoreError;

/// Oldest records are dropped beyond this many.
pub const USAGE_RETENTION: usize = 1000;

/// Default page size for usage history.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One recorded call made with a token.
///
/// `token_id` is the slot id, so after the slot is overwritten older records
/// point at whichever token currently occupies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: u64,
    pub token_id: u32,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A record before the log assigns its id.
#[derive(Debug, Clone)]
pub struct NewUsage {
    pub token_id: u32,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
}

pub trait UsageLog: Send {
    /// Append a record and return its id.
    fn append(&mut self, usage: NewUsage) -> Result<u64, StoreError>;

    /// Most recent first.
    fn list_recent(&self, limit: usize) -> Result<Vec<UsageRecord>, StoreError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryUsageLog {
    records: Vec<UsageRecord>,
}

impl MemoryUsageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageLog for MemoryUsageLog {
    fn append(&mut self, usage: NewUsage) -> Result<u64, StoreError> {
        let id = self.records.last().map_or(1, |r| r.id + 1);
        self.records.push(UsageRecord {
            id,
            token_id: usage.token_id,
            endpoint: usage.endpoint,
            method: usage.method,
            status_code: usage.status_code,
            response_time_ms: usage.response_time_ms,
            error_message: usage.error_message,
            created_at: Utc::now(),
        });
        if self.records.len() > USAGE_RETENTION {
            let excess = self.records.len() - USAGE_RETENTION;
            self.records.drain(..excess);
        }
        Ok(id)
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<UsageRecord>, StoreError> {
        Ok(self.records.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(status: u16) -> NewUsage {
        NewUsage {
            token_id: 1,
            endpoint: "https://graph.microsoft.com/v1.0/me".into(),
            method: "GET".into(),
            status_code: status,
            response_time_ms: 12,
            error_message: None,
        }
    }

    #[test]
    fn test_ids_are_sequential() {
        let mut log = MemoryUsageLog::new();
        assert_eq!(log.append(usage(200)).unwrap(), 1);
        assert_eq!(log.append(usage(401)).unwrap(), 2);
    }

    #[test]
    fn test_list_recent_is_newest_first_and_limited() {
        let mut log = MemoryUsageLog::new();
        for status in [200, 403, 401] {
            log.append(usage(status)).unwrap();
        }
        let recent = log.list_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status_code, 401);
        assert_eq!(recent[1].status_code, 403);
    }

    #[test]
    fn test_retention_drops_oldest() {
        let mut log = MemoryUsageLog::new();
        for _ in 0..(USAGE_RETENTION + 5) {
            log.append(usage(200)).unwrap();
        }
        assert_eq!(log.list_recent(usize::MAX).unwrap().len(), USAGE_RETENTION);
        let newest = log.list_recent(1).unwrap();
        assert_eq!(newest[0].id, (USAGE_RETENTION + 5) as u64);
    }
}
