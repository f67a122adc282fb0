use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::hooks::{HookError, HookInput, HookOutput, HookPoint};

#[async_trait]
pub trait HookCallback: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn call(&self, input: &HookInput) -> Result<HookOutput, HookError>;
}

/// Callbacks guarded by an optional tool-name matcher.
///
/// `None` matches everything. A pattern matches a tool name exactly, by
/// `|`-separated alternatives, or `*` for any tool.
#[derive(Clone)]
pub struct HookMatcher {
    matcher: Option<String>,
    hooks: Vec<Arc<dyn HookCallback>>,
}

impl HookMatcher {
    pub fn any(hooks: Vec<Arc<dyn HookCallback>>) -> Self {
        Self {
            matcher: None,
            hooks,
        }
    }

    pub fn for_tools(pattern: impl Into<String>, hooks: Vec<Arc<dyn HookCallback>>) -> Self {
        Self {
            matcher: Some(pattern.into()),
            hooks,
        }
    }

    pub fn pattern(&self) -> Option<&str> {
        self.matcher.as_deref()
    }

    pub fn hooks(&self) -> &[Arc<dyn HookCallback>] {
        &self.hooks
    }

    /// Run-level inputs carry no tool name and only match unrestricted matchers.
    pub fn matches(&self, tool_name: Option<&str>) -> bool {
        let Some(pattern) = self.matcher.as_deref() else {
            return true;
        };
        let Some(tool) = tool_name else {
            return pattern == "*";
        };
        pattern
            .split('|')
            .map(str::trim)
            .any(|alt| alt == "*" || alt == tool)
    }
}

impl core::fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("matcher", &self.matcher)
            .field(
                "hooks",
                &self.hooks.iter().map(|h| h.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Ordered matchers per hook point, as handed to the agent runtime.
#[derive(Debug, Clone, Default)]
pub struct HookSet {
    points: HashMap<HookPoint, Vec<HookMatcher>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, point: HookPoint, matcher: HookMatcher) -> &mut Self {
        self.points.entry(point).or_default().push(matcher);
        self
    }

    pub fn matchers(&self, point: HookPoint) -> &[HookMatcher] {
        self.points.get(&point).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run every matching callback for `input` in registration order.
    ///
    /// The first callback answering `continue: false` ends the chain. A callback
    /// that errors is logged and treated as `continue: true`. The last
    /// hook-specific output seen is returned.
    pub async fn invoke(&self, input: &HookInput) -> HookOutput {
        let mut result = HookOutput::proceed();
        let tool = input.tool_name();

        for matcher in self.matchers(input.point()) {
            if !matcher.matches(tool) {
                continue;
            }
            for hook in matcher.hooks() {
                match hook.call(input).await {
                    Ok(out) if !out.should_continue => return out,
                    Ok(out) => {
                        if out.hook_specific_output.is_some() {
                            result.hook_specific_output = out.hook_specific_output;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            hook = hook.name(),
                            point = ?input.point(),
                            session_id = input.session_id(),
                            error = %e,
                            "hook failed, continuing run"
                        );
                    }
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::PermissionDecision;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: AtomicU32,
        answer: Result<HookOutput, String>,
    }

    impl Counting {
        fn new(answer: Result<HookOutput, String>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                answer,
            })
        }
    }

    #[async_trait]
    impl HookCallback for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn call(&self, _input: &HookInput) -> Result<HookOutput, HookError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone().map_err(HookError::Failed)
        }
    }

    fn pre_tool(tool: &str) -> HookInput {
        HookInput::PreToolUse {
            session_id: "s".into(),
            tool_name: tool.into(),
            tool_use_id: "t".into(),
        }
    }

    #[test]
    fn matcher_patterns() {
        let m = HookMatcher::for_tools("generateLogo|generateMockup", vec![]);
        assert!(m.matches(Some("generateMockup")));
        assert!(!m.matches(Some("searchWeb")));
        assert!(!m.matches(None));

        assert!(HookMatcher::for_tools("*", vec![]).matches(Some("anything")));
        assert!(HookMatcher::any(vec![]).matches(None));
    }

    #[tokio::test]
    async fn failing_callback_does_not_stop_the_chain() {
        let failing = Counting::new(Err("boom".into()));
        let after = Counting::new(Ok(HookOutput::with_permission(PermissionDecision::Allow, None)));

        let mut set = HookSet::new();
        set.add(
            HookPoint::PreToolUse,
            HookMatcher::any(vec![failing as Arc<dyn HookCallback>, after.clone()]),
        );

        let out = set.invoke(&pre_tool("searchWeb")).await;

        assert!(out.should_continue);
        assert_eq!(out.permission(), Some(PermissionDecision::Allow));
        assert_eq!(after.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_answer_short_circuits() {
        let stop = Counting::new(Ok(HookOutput {
            should_continue: false,
            hook_specific_output: None,
        }));
        let never = Counting::new(Ok(HookOutput::proceed()));

        let mut set = HookSet::new();
        set.add(HookPoint::PreToolUse, HookMatcher::any(vec![stop as Arc<dyn HookCallback>]))
            .add(HookPoint::PreToolUse, HookMatcher::any(vec![never.clone() as Arc<dyn HookCallback>]));

        let out = set.invoke(&pre_tool("searchWeb")).await;

        assert!(!out.should_continue);
        assert_eq!(never.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_matching_tools_are_skipped() {
        let only_logo = Counting::new(Ok(HookOutput::proceed()));
        let mut set = HookSet::new();
        set.add(
            HookPoint::PreToolUse,
            HookMatcher::for_tools("generateLogo", vec![only_logo.clone() as Arc<dyn HookCallback>]),
        );

        set.invoke(&pre_tool("searchWeb")).await;
        set.invoke(&pre_tool("generateLogo")).await;

        assert_eq!(only_logo.calls.load(Ordering::SeqCst), 1);
    }
}
