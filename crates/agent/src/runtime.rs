use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::hooks::HookSet;

/// One request to the external agent runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub session_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub output: JsonValue,
    /// Why the run ended, as reported to the run-end hook.
    pub end_reason: String,
}

/// Multi-step model runtime with tool use.
///
/// Implementations invoke `hooks` at each hook point; the hooks never ask the
/// runtime to stop.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, request: AgentRequest, hooks: &HookSet) -> anyhow::Result<AgentResponse>;
}
