//! `brandkit-agent`
//!
//! **Responsibility:** boundary around the external multi-step agent runtime.
//!
//! - The runtime itself is a collaborator ([`AgentRuntime`]); nothing here
//!   talks to a model.
//! - Tool activity is observed through the hook pipeline, which reports
//!   progress and live updates and never aborts the run it observes.
//! - Everything that touches storage or the network is a trait implemented
//!   in the infra crate.

pub mod context;
pub mod hooks;
pub mod live;
pub mod progress;
pub mod prompt;
pub mod recovery;
pub mod runtime;
pub mod sink;
pub mod step;

pub use context::RunContext;
pub use hooks::{
    AllowAllTools, HookCallback, HookError, HookInput, HookMatcher, HookOutput, HookPipeline,
    HookPoint, HookSet, HookSpecificOutput, InMemoryRunAuditLog, PermissionDecision,
    RunAuditLog, RunAuditRecord, ToolPolicy, ToolVerdict,
};
pub use live::{BusLiveChannel, LiveChannel, LiveUpdate, LocalLiveChannel};
pub use progress::{InMemoryProgressReporter, ProgressReporter, ProgressUpdate, ToolMilestone};
pub use prompt::{PromptContext, build_step_prompt};
pub use recovery::{ErrorDescription, ErrorKind, Recoverability, classify};
pub use runtime::{AgentRequest, AgentResponse, AgentRuntime};
pub use sink::SinkError;
pub use step::WizardStep;
