use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::hooks::{
    HookCallback, HookError, HookInput, HookMatcher, HookOutput, HookPoint, HookSet, RunAuditLog,
    RunAuditRecord, ToolPolicy,
};
use crate::live::{LiveChannel, LiveUpdate};
use crate::progress::{ProgressUpdate, finished_percent, started_percent};
use crate::recovery::{ErrorDescription, classify};
use crate::sink::SinkError;

/// Collaborators shared by every hook of one run.
struct Shared {
    ctx: Arc<RunContext>,
    live: Arc<dyn LiveChannel>,
    audit: Arc<dyn RunAuditLog>,
    policy: Arc<dyn ToolPolicy>,
}

impl Shared {
    async fn publish(&self, update: LiveUpdate) {
        if let Err(e) = self.live.publish(update).await {
            log_sink_failure(&self.ctx, &e);
        }
    }

    async fn report(&self, update: ProgressUpdate) {
        if let Err(e) = self.ctx.progress().report(update).await {
            log_sink_failure(&self.ctx, &e);
        }
    }
}

fn log_sink_failure(ctx: &RunContext, err: &SinkError) {
    warn!(
        session_id = ctx.session_id(),
        sink = err.sink,
        error = %err.message,
        "hook side effect failed; run continues"
    );
}

/// Builds the five lifecycle hook sets for one run.
pub struct HookPipeline {
    shared: Arc<Shared>,
}

impl HookPipeline {
    pub fn new(
        ctx: Arc<RunContext>,
        live: Arc<dyn LiveChannel>,
        audit: Arc<dyn RunAuditLog>,
        policy: Arc<dyn ToolPolicy>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                live,
                audit,
                policy,
            }),
        }
    }

    pub fn build(&self) -> HookSet {
        let s = &self.shared;
        let mut set = HookSet::new();
        set.add(HookPoint::RunStart, single(RunStartHook(s.clone())))
            .add(HookPoint::PreToolUse, single(PreToolHook(s.clone())))
            .add(HookPoint::PostToolUse, single(PostToolHook(s.clone())))
            .add(HookPoint::PostToolUseFailure, single(ToolFailureHook(s.clone())))
            .add(HookPoint::RunEnd, single(RunEndHook(s.clone())));
        set
    }
}

fn single(hook: impl HookCallback + 'static) -> HookMatcher {
    let hook: Arc<dyn HookCallback> = Arc::new(hook);
    HookMatcher::any(vec![hook])
}

struct RunStartHook(Arc<Shared>);

#[async_trait]
impl HookCallback for RunStartHook {
    fn name(&self) -> &str {
        "run-start"
    }

    async fn call(&self, input: &HookInput) -> Result<HookOutput, HookError> {
        let HookInput::RunStart { session_id, source } = input else {
            return Ok(HookOutput::proceed());
        };
        let ctx = &self.0.ctx;
        info!(session_id = %session_id, source = %source, brand_id = %ctx.brand_id(), "agent run started");

        self.0
            .publish(LiveUpdate::RunStarted {
                session_id: session_id.clone(),
                brand_id: ctx.brand_id(),
                source: source.clone(),
            })
            .await;
        Ok(HookOutput::proceed())
    }
}

struct PreToolHook(Arc<Shared>);

#[async_trait]
impl HookCallback for PreToolHook {
    fn name(&self) -> &str {
        "pre-tool-use"
    }

    async fn call(&self, input: &HookInput) -> Result<HookOutput, HookError> {
        let HookInput::PreToolUse { tool_name, .. } = input else {
            return Ok(HookOutput::proceed());
        };
        let ctx = &self.0.ctx;
        let count = ctx.record_tool_call();
        let percent = started_percent(tool_name, count);
        debug!(session_id = ctx.session_id(), tool = %tool_name, count, percent, "tool starting");

        self.0
            .report(ProgressUpdate::percent(percent).with_status(format!("running {tool_name}")))
            .await;

        let verdict = self.0.policy.decide(ctx, tool_name);
        Ok(HookOutput::with_permission(verdict.decision, verdict.reason))
    }
}

struct PostToolHook(Arc<Shared>);

#[async_trait]
impl HookCallback for PostToolHook {
    fn name(&self) -> &str {
        "post-tool-use"
    }

    async fn call(&self, input: &HookInput) -> Result<HookOutput, HookError> {
        let HookInput::PostToolUse {
            session_id,
            tool_name,
            ..
        } = input
        else {
            return Ok(HookOutput::proceed());
        };
        let percent = finished_percent(tool_name, self.0.ctx.tool_call_count());

        self.0
            .report(ProgressUpdate::percent(percent).with_tool(tool_name.clone()))
            .await;
        self.0
            .publish(LiveUpdate::ToolProgress {
                session_id: session_id.clone(),
                tool_name: tool_name.clone(),
                percent,
            })
            .await;
        Ok(HookOutput::proceed())
    }
}

struct ToolFailureHook(Arc<Shared>);

#[async_trait]
impl HookCallback for ToolFailureHook {
    fn name(&self) -> &str {
        "post-tool-use-failure"
    }

    async fn call(&self, input: &HookInput) -> Result<HookOutput, HookError> {
        let HookInput::PostToolUseFailure {
            session_id,
            tool_name,
            error,
            ..
        } = input
        else {
            return Ok(HookOutput::proceed());
        };
        let recoverability = classify(&ErrorDescription::other(error.clone()));
        warn!(
            session_id = %session_id,
            tool = %tool_name,
            error = %error,
            ?recoverability,
            "tool failed"
        );

        self.0
            .publish(LiveUpdate::ToolError {
                session_id: session_id.clone(),
                tool_name: tool_name.clone(),
                error: error.clone(),
            })
            .await;
        Ok(HookOutput::proceed())
    }
}

struct RunEndHook(Arc<Shared>);

#[async_trait]
impl HookCallback for RunEndHook {
    fn name(&self) -> &str {
        "run-end"
    }

    async fn call(&self, input: &HookInput) -> Result<HookOutput, HookError> {
        let HookInput::RunEnd { session_id, reason } = input else {
            return Ok(HookOutput::proceed());
        };
        let ctx = &self.0.ctx;
        let record = RunAuditRecord {
            session_id: session_id.clone(),
            user_id: ctx.user_id(),
            brand_id: ctx.brand_id(),
            reason: reason.clone(),
            tool_call_count: ctx.tool_call_count(),
            ended_at: Utc::now(),
        };
        if let Err(e) = self.0.audit.record(record).await {
            log_sink_failure(ctx, &e);
        }
        info!(session_id = %session_id, reason = %reason, tools = ctx.tool_call_count(), "agent run ended");

        self.0
            .publish(LiveUpdate::RunEnded {
                session_id: session_id.clone(),
                reason: reason.clone(),
            })
            .await;
        Ok(HookOutput::proceed())
    }
}
