use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use brandkit_core::{BrandId, UserId};

use crate::progress::ProgressReporter;

/// Ephemeral state for one agent execution (one wizard step).
///
/// Created at run start and dropped at run end; only the audit record written
/// by the run-end hook outlives it.
pub struct RunContext {
    session_id: String,
    user_id: UserId,
    brand_id: BrandId,
    tool_call_count: AtomicU32,
    progress: Arc<dyn ProgressReporter>,
}

impl RunContext {
    pub fn new(
        session_id: impl Into<String>,
        user_id: UserId,
        brand_id: BrandId,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            brand_id,
            tool_call_count: AtomicU32::new(0),
            progress,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn brand_id(&self) -> BrandId {
        self.brand_id
    }

    pub fn tool_call_count(&self) -> u32 {
        self.tool_call_count.load(Ordering::SeqCst)
    }

    /// Count one more tool invocation; returns the new total.
    pub fn record_tool_call(&self) -> u32 {
        self.tool_call_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn progress(&self) -> &Arc<dyn ProgressReporter> {
        &self.progress
    }
}

impl core::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RunContext")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("brand_id", &self.brand_id)
            .field("tool_call_count", &self.tool_call_count())
            .finish()
    }
}
