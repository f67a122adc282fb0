use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brandkit_core::{BrandId, UserId};

use crate::sink::SinkError;

/// Terminal record of one agent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAuditRecord {
    pub session_id: String,
    pub user_id: UserId,
    pub brand_id: BrandId,
    pub reason: String,
    pub tool_call_count: u32,
    pub ended_at: DateTime<Utc>,
}

#[async_trait]
pub trait RunAuditLog: Send + Sync {
    async fn record(&self, record: RunAuditRecord) -> Result<(), SinkError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRunAuditLog {
    records: Mutex<Vec<RunAuditRecord>>,
}

impl InMemoryRunAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RunAuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunAuditLog for InMemoryRunAuditLog {
    async fn record(&self, record: RunAuditRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
