//! Single entry point for tool calls.
//!
//! Every call goes through the same sequence: lookup, plan gate, argument
//! validation, permission gate, execution, then significant-action
//! bookkeeping. Failures come back as `ToolOutcome { ok: false, .. }`; only a
//! deny-and-terminate answer escapes as [`Terminated`].

use serde_json::Value;
use tricode_types::ToolDefinition;

use crate::builtins::register_builtins;
use crate::permission::{
    ConfirmationRequest, PermissionGate, TERMINATE_EXIT_CODE, TerminateMode, Verdict,
};
use crate::{AgentContext, ToolError, ToolRegistry, validate_args};

/// Name of the tool that is always allowed through the plan gate.
pub const PLAN_TOOL: &str = "plan";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub ok: bool,
    pub result: String,
}

impl ToolOutcome {
    fn success(result: String) -> Self {
        Self { ok: true, result }
    }

    fn failure(err: &ToolError) -> Self {
        Self {
            ok: false,
            result: err.to_string(),
        }
    }
}

/// The user chose to stop the run at a confirmation prompt.
#[derive(Debug, Clone, thiserror::Error)]
#[error("terminated by user at confirmation for '{tool}'")]
pub struct Terminated {
    pub tool: String,
}

enum Stop {
    Failed(ToolError),
    Terminate,
}

impl From<ToolError> for Stop {
    fn from(err: ToolError) -> Self {
        Self::Failed(err)
    }
}

pub struct Dispatcher {
    registry: ToolRegistry,
    gate: PermissionGate,
}

impl Dispatcher {
    /// Dispatcher over every built-in tool.
    pub fn new(gate: PermissionGate) -> Result<Self, ToolError> {
        let mut registry = ToolRegistry::default();
        register_builtins(&mut registry)?;
        Ok(Self::with_registry(registry, gate))
    }

    #[must_use]
    pub fn with_registry(registry: ToolRegistry, gate: PermissionGate) -> Self {
        Self { registry, gate }
    }

    /// Tool manifest for the orchestrator, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(
        &self,
        ctx: &mut AgentContext,
        name: &str,
        args: Value,
    ) -> Result<ToolOutcome, Terminated> {
        let args = if args.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            args
        };

        match self.run(ctx, name, args).await {
            Ok(result) => {
                tracing::debug!(tool = name, bytes = result.len(), "tool succeeded");
                Ok(ToolOutcome::success(result))
            }
            Err(Stop::Failed(err)) => {
                tracing::debug!(tool = name, error = %err, "tool failed");
                Ok(ToolOutcome::failure(&err))
            }
            Err(Stop::Terminate) => {
                if self.gate.terminate_mode() == TerminateMode::ExitProcess {
                    tracing::warn!(tool = name, "terminating process at user request");
                    ctx.sessions.shutdown().await;
                    std::process::exit(TERMINATE_EXIT_CODE);
                }
                Err(Terminated {
                    tool: name.to_string(),
                })
            }
        }
    }

    async fn run(&self, ctx: &mut AgentContext, name: &str, args: Value) -> Result<String, Stop> {
        let tool = self.registry.lookup(name)?;

        if name != PLAN_TOOL && !ctx.flags.bypass_plan_check && !ctx.plan.is_decided() {
            tracing::debug!(tool = name, "blocked by plan gate");
            return Err(ToolError::PlanGateBlocked {
                tool: name.to_string(),
            }
            .into());
        }

        validate_args(&tool.schema(), &args)?;
        let summary = tool.approval_summary(&args)?;
        tracing::debug!(tool = name, summary, "dispatching");

        if tool.is_destructive() {
            let request = ConfirmationRequest {
                tool: name.to_string(),
                summary,
                preview: tool.approval_preview(&args, ctx),
            };
            match self.gate.check(request, &mut ctx.approvals).await {
                Verdict::Proceed => {}
                Verdict::Denied { message } => {
                    return Err(ToolError::PermissionDenied { message }.into());
                }
                Verdict::Terminate => return Err(Stop::Terminate),
            }
        }

        let significant = tool.is_significant(&args);
        let result = tool.execute(args, ctx).await?;
        if significant {
            ctx.plan.record_significant_action();
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    use super::Dispatcher;
    use crate::config::ToolsConfig;
    use crate::permission::{ConfirmationStrategy, Decision, PermissionGate};
    use crate::AgentContext;

    fn setup(decision: Decision) -> (TempDir, AgentContext, Dispatcher) {
        let dir = tempdir().unwrap();
        let ctx = AgentContext::new(dir.path(), &ToolsConfig::default()).unwrap();
        let dispatcher =
            Dispatcher::new(PermissionGate::new(ConfirmationStrategy::fixed(decision))).unwrap();
        (dir, ctx, dispatcher)
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_outcome() {
        let (_dir, mut ctx, dispatcher) = setup(Decision::AllowOnce);
        let outcome = dispatcher
            .execute(&mut ctx, "nope", json!({}))
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.result, "Unknown tool: nope");
    }

    #[tokio::test]
    async fn schema_violations_fail_before_execution() {
        let (_dir, mut ctx, dispatcher) = setup(Decision::AllowOnce);
        ctx.plan.skip(None);
        let outcome = dispatcher
            .execute(&mut ctx, "read_file", json!({"path": "a", "bogus": 1}))
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert!(outcome.result.starts_with("Invalid arguments:"));
    }

    #[tokio::test]
    async fn denied_call_has_no_effect() {
        let (dir, mut ctx, dispatcher) = setup(Decision::DenyAndContinue);
        ctx.plan.skip(None);
        let outcome = dispatcher
            .execute(&mut ctx, "mkdir", json!({"path": "made"}))
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert!(outcome.result.starts_with("Permission denied by user:"));
        assert!(!dir.path().join("made").exists());
    }

    #[tokio::test]
    async fn terminate_returns_error_by_default() {
        let (_dir, mut ctx, dispatcher) = setup(Decision::DenyAndTerminate);
        ctx.plan.skip(None);
        let err = dispatcher
            .execute(&mut ctx, "mkdir", json!({"path": "made"}))
            .await
            .unwrap_err();
        assert_eq!(err.tool, "mkdir");
    }

    #[tokio::test]
    async fn significant_actions_are_counted() {
        let (dir, mut ctx, dispatcher) = setup(Decision::AllowOnce);
        std::fs::write(dir.path().join("f.txt"), "foo\n").unwrap();
        dispatcher
            .execute(&mut ctx, "plan", json!({"action": "create", "tasks": ["edit"]}))
            .await
            .unwrap();

        let edit = |dry_run: bool| {
            json!({
                "path": "f.txt",
                "mode": "append",
                "content": "more\n",
                "dry_run": dry_run
            })
        };
        let outcome = dispatcher
            .execute(&mut ctx, "edit_file", edit(true))
            .await
            .unwrap();
        assert!(outcome.ok, "{}", outcome.result);
        assert_eq!(ctx.plan.significant_actions(), 0);

        dispatcher
            .execute(&mut ctx, "edit_file", edit(false))
            .await
            .unwrap();
        dispatcher
            .execute(&mut ctx, "read_file", json!({"path": "f.txt"}))
            .await
            .unwrap();
        assert_eq!(ctx.plan.significant_actions(), 1);
    }

    #[test]
    fn manifest_is_sorted_and_complete() {
        let dispatcher = Dispatcher::new(PermissionGate::new(ConfirmationStrategy::fixed(
            Decision::AllowOnce,
        )))
        .unwrap();
        let names: Vec<String> = dispatcher
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names.len(), 14);
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        assert!(names.contains(&"plan".to_string()));
    }
}
