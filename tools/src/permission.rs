//! Confirmation for destructive tool calls.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::io::{BufRead, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::config::{PermissionsConfig, TerminateSetting};

/// What the user chose for one confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    AllowOnce,
    /// Allow, and stop asking for this tool until the conversation ends.
    AllowForSession,
    DenyAndContinue,
    DenyAndTerminate,
}

impl Decision {
    /// Map a prompt answer (`y`, `a`, `n`, `q`) to a decision.
    #[must_use]
    pub fn from_key(answer: &str) -> Option<Self> {
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(Self::AllowOnce),
            "a" | "always" => Some(Self::AllowForSession),
            "n" | "no" => Some(Self::DenyAndContinue),
            "q" | "quit" => Some(Self::DenyAndTerminate),
            _ => None,
        }
    }
}

/// How a deny-and-terminate decision ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminateMode {
    /// `std::process::exit(130)`.
    ExitProcess,
    /// Surface `Terminated` to the host.
    #[default]
    ReturnError,
}

impl From<TerminateSetting> for TerminateMode {
    fn from(setting: TerminateSetting) -> Self {
        match setting {
            TerminateSetting::Exit => Self::ExitProcess,
            TerminateSetting::Error => Self::ReturnError,
        }
    }
}

/// Exit status used when the user quits at a prompt.
pub const TERMINATE_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub tool: String,
    pub summary: String,
    /// Dry-run diff or similar detail, shown below the summary.
    pub preview: Option<String>,
}

pub type DecisionFut = Pin<Box<dyn Future<Output = Decision> + Send>>;
pub type ConfirmCallback = Arc<dyn Fn(ConfirmationRequest) -> DecisionFut + Send + Sync>;

/// Terminal-style prompt endpoints.
pub struct PromptIo {
    reader: Box<dyn BufRead + Send>,
    writer: Box<dyn Write + Send>,
}

impl PromptIo {
    #[must_use]
    pub fn new(reader: Box<dyn BufRead + Send>, writer: Box<dyn Write + Send>) -> Self {
        Self { reader, writer }
    }

    /// stdin for answers, stderr for the question.
    #[must_use]
    pub fn terminal() -> Self {
        Self::new(
            Box::new(std::io::BufReader::new(std::io::stdin())),
            Box::new(std::io::stderr()),
        )
    }

    fn ask(&mut self, request: &ConfirmationRequest) -> std::io::Result<Decision> {
        writeln!(self.writer)?;
        writeln!(self.writer, "[confirm] {}: {}", request.tool, request.summary)?;
        if let Some(preview) = request.preview.as_deref().filter(|p| !p.is_empty()) {
            writeln!(self.writer, "{preview}")?;
        }
        loop {
            write!(
                self.writer,
                "Allow? [y]es once / [a]lways this session / [n]o / [q]uit: "
            )?;
            self.writer.flush()?;

            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                // Nobody is there to answer.
                writeln!(self.writer)?;
                return Ok(Decision::DenyAndContinue);
            }
            if let Some(decision) = Decision::from_key(&line) {
                return Ok(decision);
            }
            writeln!(self.writer, "Please answer y, a, n or q.")?;
        }
    }
}

pub enum ConfirmationStrategy {
    /// Blocking prompt, run on a blocking thread.
    SynchronousPrompt(Arc<Mutex<PromptIo>>),
    /// Injected async decision function.
    AsyncCallback(ConfirmCallback),
}

impl ConfirmationStrategy {
    #[must_use]
    pub fn terminal() -> Self {
        Self::prompt(PromptIo::terminal())
    }

    #[must_use]
    pub fn prompt(io: PromptIo) -> Self {
        Self::SynchronousPrompt(Arc::new(Mutex::new(io)))
    }

    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn(ConfirmationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Decision> + Send + 'static,
    {
        Self::AsyncCallback(Arc::new(move |req| Box::pin(f(req))))
    }

    /// Always answer with `decision`.
    #[must_use]
    pub fn fixed(decision: Decision) -> Self {
        Self::callback(move |_| async move { decision })
    }

    async fn decide(&self, request: ConfirmationRequest) -> Decision {
        match self {
            Self::SynchronousPrompt(io) => {
                let io = Arc::clone(io);
                let tool = request.tool.clone();
                let answer = tokio::task::spawn_blocking(move || {
                    let mut io = io.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    io.ask(&request)
                })
                .await;
                match answer {
                    Ok(Ok(decision)) => decision,
                    Ok(Err(e)) => {
                        tracing::warn!(tool, "confirmation prompt failed: {e}");
                        Decision::DenyAndContinue
                    }
                    Err(e) => {
                        tracing::warn!(tool, "confirmation prompt task failed: {e}");
                        Decision::DenyAndContinue
                    }
                }
            }
            Self::AsyncCallback(callback) => callback(request).await,
        }
    }
}

impl fmt::Debug for ConfirmationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SynchronousPrompt(_) => f.write_str("SynchronousPrompt"),
            Self::AsyncCallback(_) => f.write_str("AsyncCallback"),
        }
    }
}

/// Result of passing a call through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Denied { message: String },
    Terminate,
}

#[derive(Debug)]
pub struct PermissionGate {
    strategy: ConfirmationStrategy,
    bypass: bool,
    allow: HashSet<String>,
    terminate_mode: TerminateMode,
}

impl PermissionGate {
    #[must_use]
    pub fn new(strategy: ConfirmationStrategy) -> Self {
        Self {
            strategy,
            bypass: false,
            allow: HashSet::new(),
            terminate_mode: TerminateMode::default(),
        }
    }

    #[must_use]
    pub fn from_config(strategy: ConfirmationStrategy, config: &PermissionsConfig) -> Self {
        Self {
            strategy,
            bypass: config.bypass,
            allow: config.allow.iter().cloned().collect(),
            terminate_mode: config.terminate.into(),
        }
    }

    #[must_use]
    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    #[must_use]
    pub fn terminate_mode(&self) -> TerminateMode {
        self.terminate_mode
    }

    /// Decide whether `request` may run. Checks bypass, then the configured
    /// allow list and `approvals`, then asks the strategy.
    pub async fn check(
        &self,
        request: ConfirmationRequest,
        approvals: &mut HashSet<String>,
    ) -> Verdict {
        if self.bypass || self.allow.contains(&request.tool) || approvals.contains(&request.tool)
        {
            return Verdict::Proceed;
        }

        let tool = request.tool.clone();
        let summary = request.summary.clone();
        match self.strategy.decide(request).await {
            Decision::AllowOnce => Verdict::Proceed,
            Decision::AllowForSession => {
                tracing::debug!(tool, "approved for the rest of the session");
                approvals.insert(tool);
                Verdict::Proceed
            }
            Decision::DenyAndContinue => {
                tracing::warn!(tool, summary, "permission denied");
                Verdict::Denied {
                    message: format!("{tool}: {summary}"),
                }
            }
            Decision::DenyAndTerminate => {
                tracing::warn!(tool, summary, "permission denied, terminating");
                Verdict::Terminate
            }
        }
    }
}
