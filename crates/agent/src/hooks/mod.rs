//! Lifecycle hooks invoked by the agent runtime.
//!
//! Hooks observe a run; they report progress and notifications and always let
//! the run continue.

mod audit;
mod pipeline;
mod policy;
mod set;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sink::SinkError;

pub use audit::{InMemoryRunAuditLog, RunAuditLog, RunAuditRecord};
pub use pipeline::HookPipeline;
pub use policy::{AllowAllTools, ToolPolicy, ToolVerdict};
pub use set::{HookCallback, HookMatcher, HookSet};

/// Points in a run where hooks are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookPoint {
    RunStart,
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    RunEnd,
}

impl HookPoint {
    pub const ALL: [HookPoint; 5] = [
        HookPoint::RunStart,
        HookPoint::PreToolUse,
        HookPoint::PostToolUse,
        HookPoint::PostToolUseFailure,
        HookPoint::RunEnd,
    ];
}

/// Payload handed to a hook by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookInput {
    RunStart {
        session_id: String,
        source: String,
    },
    PreToolUse {
        session_id: String,
        tool_name: String,
        tool_use_id: String,
    },
    PostToolUse {
        session_id: String,
        tool_name: String,
        tool_use_id: String,
    },
    PostToolUseFailure {
        session_id: String,
        tool_name: String,
        tool_use_id: String,
        error: String,
    },
    RunEnd {
        session_id: String,
        reason: String,
    },
}

impl HookInput {
    pub fn point(&self) -> HookPoint {
        match self {
            HookInput::RunStart { .. } => HookPoint::RunStart,
            HookInput::PreToolUse { .. } => HookPoint::PreToolUse,
            HookInput::PostToolUse { .. } => HookPoint::PostToolUse,
            HookInput::PostToolUseFailure { .. } => HookPoint::PostToolUseFailure,
            HookInput::RunEnd { .. } => HookPoint::RunEnd,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            HookInput::RunStart { session_id, .. }
            | HookInput::PreToolUse { session_id, .. }
            | HookInput::PostToolUse { session_id, .. }
            | HookInput::PostToolUseFailure { session_id, .. }
            | HookInput::RunEnd { session_id, .. } => session_id,
        }
    }

    /// Tool name for tool hooks; `None` for run-level hooks.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            HookInput::PreToolUse { tool_name, .. }
            | HookInput::PostToolUse { tool_name, .. }
            | HookInput::PostToolUseFailure { tool_name, .. } => Some(tool_name),
            HookInput::RunStart { .. } | HookInput::RunEnd { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
    Ask,
}

/// Hook-point specific part of a hook's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    pub hook_event_name: HookPoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PermissionDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
}

/// What a hook returns to the runtime: `{continue, hookSpecificOutput?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    #[serde(rename = "continue")]
    pub should_continue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl HookOutput {
    pub fn proceed() -> Self {
        Self {
            should_continue: true,
            hook_specific_output: None,
        }
    }

    pub fn with_permission(
        decision: PermissionDecision,
        reason: Option<String>,
    ) -> Self {
        Self {
            should_continue: true,
            hook_specific_output: Some(HookSpecificOutput {
                hook_event_name: HookPoint::PreToolUse,
                permission_decision: Some(decision),
                permission_decision_reason: reason,
            }),
        }
    }

    pub fn permission(&self) -> Option<PermissionDecision> {
        self.hook_specific_output
            .as_ref()
            .and_then(|o| o.permission_decision)
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("hook failed: {0}")]
    Failed(String),
}
