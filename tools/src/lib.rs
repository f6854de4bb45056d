//! Tool runtime: sandboxed filesystem tools, patching, shell sessions,
//! permission and plan gating, all behind one [`Dispatcher`].

pub mod builtins;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod patch;
pub mod permission;
pub mod plan;
pub mod process;
pub mod sandbox;
pub mod session_tools;
pub mod sessions;
pub mod shell;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde_json::Value;
use tricode_types::ToolDefinition;

pub use builtins::register_builtins;
pub use context::{AgentContext, ToolFlags, ToolLimits};
pub use dispatch::{Dispatcher, Terminated, ToolOutcome};
pub use patch::PatchEngine;
pub use permission::{
    ConfirmationRequest, ConfirmationStrategy, Decision, PermissionGate, PromptIo,
    TERMINATE_EXIT_CODE, TerminateMode, Verdict,
};
pub use plan::{PlanStore, PlanTool, PlanTracker};
pub use sandbox::PathSandbox;
pub use sessions::{Clock, ManualClock, SessionInfo, SessionLimits, SessionManager, SystemClock};
pub use shell::DetectedShell;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// Error types for tool execution.
///
/// Every variant is reported to the caller as a failed result; none of them
/// stop the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments: {message}")]
    BadArgs { message: String },
    #[error("Sandbox violation: {0}")]
    SandboxViolation(DenialReason),
    #[error("Not found: {message}")]
    NotFound { message: String },
    #[error("Conflict: {message}")]
    Conflict { message: String },
    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },
    #[error("Permission denied by user: {message}")]
    PermissionDenied { message: String },
    #[error(
        "No execution plan decision yet. Call plan(action='create', tasks=[...]) or plan(action='skip') before using '{tool}'"
    )]
    PlanGateBlocked { tool: String },
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("{tool} timed out after {secs}s{output}")]
    Timeout {
        tool: String,
        secs: u64,
        output: String,
    },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
}

impl ToolError {
    pub(crate) fn failed(tool: &str, message: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed {
            tool: tool.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn bad_args(message: impl Into<String>) -> Self {
        Self::BadArgs {
            message: message.into(),
        }
    }
}

/// Denial reason for sandbox policy.
#[derive(Debug, Clone)]
pub enum DenialReason {
    PathOutsideSandbox {
        attempted: PathBuf,
        resolved: PathBuf,
    },
    DeniedPatternMatched {
        attempted: PathBuf,
        pattern: String,
    },
    UnresolvableTraversal {
        attempted: PathBuf,
    },
    WorkRootProtected {
        attempted: PathBuf,
    },
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::PathOutsideSandbox {
                attempted,
                resolved,
            } => write!(
                f,
                "Path outside working directory (attempted: {}, resolved: {})",
                attempted.display(),
                resolved.display()
            ),
            DenialReason::DeniedPatternMatched { attempted, pattern } => write!(
                f,
                "Path '{}' matched denied pattern '{}'",
                attempted.display(),
                pattern
            ),
            DenialReason::UnresolvableTraversal { attempted } => write!(
                f,
                "Path '{}' uses '..' below a directory that does not exist",
                attempted.display()
            ),
            DenialReason::WorkRootProtected { attempted } => write!(
                f,
                "Refusing to delete the working directory itself ({})",
                attempted.display()
            ),
        }
    }
}

/// A tool the dispatcher can route calls to.
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    /// Destructive tools pass through the permission gate.
    fn is_destructive(&self) -> bool {
        false
    }
    /// Whether a successful call counts toward the plan's significant-action
    /// counter.
    fn is_significant(&self, _args: &Value) -> bool {
        self.is_destructive()
    }
    fn approval_summary(&self, args: &Value) -> Result<String, ToolError>;
    /// Extra material shown with a confirmation request (e.g. a dry-run diff).
    fn approval_preview(&self, _args: &Value, _ctx: &AgentContext) -> Option<String> {
        None
    }
    fn execute<'a>(&'a self, args: Value, ctx: &'a mut AgentContext) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Tool registry keyed by tool name.
#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, Box<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn register(&mut self, executor: Box<dyn ToolExecutor>) -> Result<(), ToolError> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn ToolExecutor, ToolError> {
        self.executors
            .get(name)
            .map(std::convert::AsRef::as_ref)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .executors
            .values()
            .map(|exec| ToolDefinition::new(exec.name(), exec.description(), exec.schema()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Names of every registered destructive tool, sorted.
    #[must_use]
    pub fn destructive_tools(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .executors
            .values()
            .filter(|exec| exec.is_destructive())
            .map(|exec| exec.name())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Sanitizes environment variables before executing commands.
#[derive(Debug, Clone)]
pub struct EnvSanitizer {
    denylist: globset::GlobSet,
}

/// Variables stripped from every child environment by default.
pub const DEFAULT_ENV_DENYLIST: &[&str] = &[
    "*_KEY",
    "*_SECRET",
    "*_TOKEN",
    "*_PASSWORD",
    "*_CREDENTIALS",
    "AWS_*",
    "ANTHROPIC_*",
    "OPENAI_*",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_*",
];

impl EnvSanitizer {
    pub fn new(patterns: &[String]) -> Result<Self, ToolError> {
        let mut builder = globset::GlobSetBuilder::new();
        for pat in patterns {
            let mut glob = globset::GlobBuilder::new(pat);
            // *_KEY must match api_key as well as API_KEY.
            glob.case_insensitive(true);
            let glob = glob.build().map_err(|e| ToolError::BadArgs {
                message: format!("Invalid env denylist pattern '{pat}': {e}"),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| ToolError::BadArgs {
            message: format!("Invalid env denylist: {e}"),
        })?;
        Ok(Self { denylist: set })
    }

    #[must_use]
    pub fn is_denied(&self, key: &str) -> bool {
        self.denylist.is_match(key)
    }

    #[must_use]
    pub fn sanitize_env(&self, env: &[(String, String)]) -> Vec<(String, String)> {
        env.iter()
            .filter(|(k, _)| !self.is_denied(k))
            .cloned()
            .collect()
    }
}

impl Default for EnvSanitizer {
    fn default() -> Self {
        Self {
            denylist: default_env_denylist(),
        }
    }
}

fn default_env_denylist() -> globset::GlobSet {
    let mut builder = globset::GlobSetBuilder::new();
    for pat in DEFAULT_ENV_DENYLIST {
        if let Ok(glob) = globset::GlobBuilder::new(pat).case_insensitive(true).build() {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| globset::GlobSet::empty())
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    if let Err(err) = validator.validate(args) {
        return Err(ToolError::BadArgs {
            message: err.to_string(),
        });
    }
    Ok(())
}

/// Marker appended when output is cut short.
pub const TRUNCATION_MARKER: &str = "... [output truncated]";

/// Truncate tool output to at most `effective_max` bytes of body, then append
/// the truncation marker on its own line.
#[must_use]
pub fn truncate_output(output: String, effective_max: usize) -> String {
    if output.len() <= effective_max {
        return output;
    }
    let mut end = effective_max;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = output;
    truncated.truncate(end);
    if !truncated.ends_with('\n') {
        truncated.push('\n');
    }
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

#[cfg(test)]
mod tests {
    use super::{EnvSanitizer, TRUNCATION_MARKER, ToolError, truncate_output, validate_args};
    use serde_json::json;

    #[test]
    fn env_sanitizer_strips_secrets_case_insensitively() {
        let sanitizer = EnvSanitizer::default();
        let env = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("api_key".to_string(), "abc".to_string()),
            ("GITHUB_TOKEN".to_string(), "ghp".to_string()),
            ("LD_PRELOAD".to_string(), "/evil.so".to_string()),
            ("HOME".to_string(), "/home/test".to_string()),
        ];
        let clean = sanitizer.sanitize_env(&env);
        let keys: Vec<&str> = clean.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["PATH", "HOME"]);
    }

    #[test]
    fn env_sanitizer_rejects_bad_pattern() {
        assert!(EnvSanitizer::new(&["[".to_string()]).is_err());
    }

    #[test]
    fn truncate_output_keeps_short_output() {
        assert_eq!(truncate_output("short".into(), 100), "short");
    }

    #[test]
    fn truncate_output_respects_char_boundaries() {
        let out = truncate_output("héllo world".into(), 2);
        assert_eq!(out, format!("h\n{TRUNCATION_MARKER}"));
    }

    #[test]
    fn validate_args_reports_schema_violations() {
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
            "additionalProperties": false
        });
        assert!(validate_args(&schema, &json!({"path": "a"})).is_ok());
        assert!(matches!(
            validate_args(&schema, &json!({})),
            Err(ToolError::BadArgs { .. })
        ));
        assert!(validate_args(&schema, &json!({"path": "a", "extra": 1})).is_err());
    }
}
