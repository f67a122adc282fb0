use crate::context::RunContext;
use crate::hooks::PermissionDecision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVerdict {
    pub decision: PermissionDecision,
    pub reason: Option<String>,
}

impl ToolVerdict {
    pub fn allow() -> Self {
        Self {
            decision: PermissionDecision::Allow,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: PermissionDecision::Deny,
            reason: Some(reason.into()),
        }
    }
}

/// Decides whether a tool call may proceed.
pub trait ToolPolicy: Send + Sync {
    fn decide(&self, ctx: &RunContext, tool_name: &str) -> ToolVerdict;
}

/// Permits every tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllTools;

impl ToolPolicy for AllowAllTools {
    fn decide(&self, _ctx: &RunContext, _tool_name: &str) -> ToolVerdict {
        ToolVerdict::allow()
    }
}
