//! Per-conversation state handed to every tool executor.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tricode_types::ConversationId;

use crate::config::{ShellConfig, ToolsConfig};
use crate::plan::{PlanStore, PlanTracker};
use crate::sandbox::{PathSandbox, default_sandbox_deny_patterns};
use crate::sessions::{Clock, SessionLimits, SessionManager, SystemClock};
use crate::shell::{DetectedShell, detect_shell};
use crate::{DEFAULT_ENV_DENYLIST, EnvSanitizer, ToolError};

/// Output and timeout limits for one-shot tools.
#[derive(Debug, Clone, Copy)]
pub struct ToolLimits {
    pub run_timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(30),
            max_output_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolFlags {
    /// Let every tool run before a plan decision exists.
    pub bypass_plan_check: bool,
}

/// Everything a tool call may read or mutate.
///
/// Tools receive it by `&mut`, so calls within one context run one at a time.
#[derive(Debug)]
pub struct AgentContext {
    pub sandbox: PathSandbox,
    pub sessions: SessionManager,
    pub plan: PlanTracker,
    /// Tools approved for the rest of the conversation.
    pub approvals: HashSet<String>,
    pub run_shell: DetectedShell,
    pub shell_config: ShellConfig,
    pub env_sanitizer: EnvSanitizer,
    pub limits: ToolLimits,
    pub flags: ToolFlags,
}

impl AgentContext {
    pub fn new(work_dir: &Path, config: &ToolsConfig) -> Result<Self, ToolError> {
        Self::with_clock(work_dir, config, Arc::new(SystemClock))
    }

    /// Like [`AgentContext::new`] but with an explicit session clock.
    pub fn with_clock(
        work_dir: &Path,
        config: &ToolsConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ToolError> {
        let deny = config
            .sandbox
            .denied_patterns
            .clone()
            .unwrap_or_else(default_sandbox_deny_patterns);
        let sandbox = PathSandbox::new(work_dir, &deny, config.sandbox.bypass_work_dir)?;

        let env_sanitizer = match &config.environment.denylist {
            Some(patterns) => EnvSanitizer::new(patterns)?,
            None => EnvSanitizer::new(
                &DEFAULT_ENV_DENYLIST
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect::<Vec<_>>(),
            )?,
        };

        let sessions = SessionManager::new(
            sandbox.root().to_path_buf(),
            SessionLimits::from(&config.sessions),
            env_sanitizer.clone(),
            clock,
        );

        let defaults = ToolLimits::default();
        let limits = ToolLimits {
            run_timeout: config
                .run
                .default_timeout_secs
                .map_or(defaults.run_timeout, Duration::from_secs),
            max_output_bytes: config.run.max_output_bytes.unwrap_or(defaults.max_output_bytes),
        };

        tracing::debug!(
            root = %sandbox.root().display(),
            bypass = sandbox.bypass(),
            "agent context created"
        );

        Ok(Self {
            sandbox,
            sessions,
            plan: PlanTracker::new(),
            approvals: HashSet::new(),
            run_shell: detect_shell(Some(&config.shell)),
            shell_config: config.shell.clone(),
            env_sanitizer,
            limits,
            flags: ToolFlags {
                bypass_plan_check: !config.plan.enforce,
            },
        })
    }

    #[must_use]
    pub fn with_plan_store(mut self, store: PlanStore) -> Self {
        self.plan = PlanTracker::with_store(store);
        self
    }

    /// Start (or resume) a conversation: forget session approvals and load
    /// its plan decision.
    pub fn begin_conversation(&mut self, conversation: ConversationId) {
        self.approvals.clear();
        self.plan.restore(conversation);
    }
}
