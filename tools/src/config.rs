//! Configuration types used by tool executors.
//!
//! These are the `[tools.*]` tables of `~/.tricode/config.toml`; the config
//! crate deserializes them and hands them to the runtime.

use serde::Deserialize;

/// Serde helper for fields that default to `true`.
#[must_use]
pub const fn default_true() -> bool {
    true
}

/// All `[tools.*]` sections.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub sandbox: SandboxConfig,
    pub sessions: SessionsConfig,
    pub run: RunConfig,
    pub shell: ShellConfig,
    pub environment: EnvironmentConfig,
    pub permissions: PermissionsConfig,
    pub plan: PlanConfig,
}

/// ```toml
/// [tools.sandbox]
/// denied_patterns = ["**/.ssh/**", "**/*.pem"]
/// bypass_work_dir = false
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// `None` keeps the built-in list; an empty list disables deny globs.
    pub denied_patterns: Option<Vec<String>>,
    pub bypass_work_dir: bool,
}

/// Interactive session limits. Unset fields keep their defaults.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub max_sessions: Option<usize>,
    pub output_buffer_bytes: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
    pub lifetime_secs: Option<u64>,
    pub reap_interval_secs: Option<u64>,
    pub kill_grace_secs: Option<u64>,
    pub settle_ms: Option<u64>,
}

/// ```toml
/// [tools.run]
/// default_timeout_secs = 30
/// max_output_bytes = 65536
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub default_timeout_secs: Option<u64>,
    pub max_output_bytes: Option<usize>,
}

/// Shell configuration for command execution.
///
/// ```toml
/// [tools.shell]
/// binary = "bash"
/// args = ["-c"]
/// session_shell = "/bin/zsh"
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Override shell binary (e.g., "bash", "/usr/local/bin/fish").
    pub binary: Option<String>,
    /// Override shell args (e.g., `["-c"]`).
    pub args: Option<Vec<String>>,
    /// Default shell for `start_session` when the caller does not pass one.
    pub session_shell: Option<String>,
}

/// ```toml
/// [tools.environment]
/// denylist = ["*_TOKEN", "AWS_*"]
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// `None` keeps the built-in denylist.
    pub denylist: Option<Vec<String>>,
}

/// ```toml
/// [tools.permissions]
/// bypass = false
/// allow = ["mkdir"]
/// terminate = "error"   # or "exit"
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Skip confirmation for every destructive tool.
    pub bypass: bool,
    /// Destructive tools that never prompt.
    pub allow: Vec<String>,
    pub terminate: TerminateSetting,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateSetting {
    /// Exit the process with status 130.
    Exit,
    /// Return a `Terminated` error to the host.
    #[default]
    Error,
}

/// ```toml
/// [tools.plan]
/// enforce = true
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Block non-plan tools until a plan is created or skipped.
    #[serde(default = "default_true")]
    pub enforce: bool,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self { enforce: true }
    }
}
