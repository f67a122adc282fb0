use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sink::SinkError;

/// Ceiling for progress reported while a run is still in flight. 100 is
/// reserved for the job's own completion.
pub const MAX_IN_FLIGHT_PERCENT: u8 = 95;

/// Progress snapshot pushed to the owning job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ProgressUpdate {
    pub fn percent(percent: u8) -> Self {
        Self {
            percent: percent.min(MAX_IN_FLIGHT_PERCENT),
            last_tool: None,
            status: None,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.last_tool = Some(tool.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Write side of job progress.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, update: ProgressUpdate) -> Result<(), SinkError>;
}

/// Records updates in memory. Used by tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryProgressReporter {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl InMemoryProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<ProgressUpdate> {
        self.updates.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ProgressReporter for InMemoryProgressReporter {
    async fn report(&self, update: ProgressUpdate) -> Result<(), SinkError> {
        self.updates.lock().unwrap().push(update);
        Ok(())
    }
}

/// Fixed progress points for a well-known tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolMilestone {
    pub started: u8,
    pub finished: u8,
}

const MILESTONES: &[(&str, ToolMilestone)] = &[
    ("checkCredits", ToolMilestone { started: 10, finished: 15 }),
    ("scrapeSocialProfile", ToolMilestone { started: 15, finished: 25 }),
    ("searchWeb", ToolMilestone { started: 20, finished: 30 }),
    ("analyzeBrand", ToolMilestone { started: 35, finished: 45 }),
    ("generateLogo", ToolMilestone { started: 50, finished: 65 }),
    ("generateMockup", ToolMilestone { started: 65, finished: 80 }),
    ("saveBrandData", ToolMilestone { started: 85, finished: 95 }),
];

impl ToolMilestone {
    /// Milestones for `tool`, if it is one of the known tools. Names match exactly.
    pub fn for_tool(tool: &str) -> Option<ToolMilestone> {
        MILESTONES
            .iter()
            .find(|(name, _)| *name == tool)
            .map(|(_, milestone)| *milestone)
    }
}

/// Progress for tools without a milestone: `min(count * 10, 95)`.
pub fn fallback_percent(tool_call_count: u32) -> u8 {
    let percent = tool_call_count
        .saturating_mul(10)
        .min(u32::from(MAX_IN_FLIGHT_PERCENT));
    percent as u8
}

/// Progress reported when `tool` is about to run.
pub fn started_percent(tool: &str, tool_call_count: u32) -> u8 {
    ToolMilestone::for_tool(tool)
        .map(|m| m.started)
        .unwrap_or_else(|| fallback_percent(tool_call_count))
}

/// Progress reported after `tool` finished.
pub fn finished_percent(tool: &str, tool_call_count: u32) -> u8 {
    ToolMilestone::for_tool(tool)
        .map(|m| m.finished)
        .unwrap_or_else(|| fallback_percent(tool_call_count))
}
