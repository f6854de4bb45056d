//! Tricode CLI - batch host for the tool runtime.
//!
//! Runs one tool call, or a script of calls, through the [`Dispatcher`] with
//! a terminal confirmation prompt, printing each result and the plan
//! reminders that follow it.
//!
//! ```text
//! tricode [--work-dir DIR] [--bypass-work-dir] [--yes] [--no-plan-check]
//!         [--session ID] (--script FILE | --list-tools | TOOL JSON_ARGS)
//! ```

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tricode_config::TricodeConfig;
use tricode_tools::{
    AgentContext, ConfirmationStrategy, Dispatcher, PermissionGate, PlanStore,
    TERMINATE_EXIT_CODE,
};
use tricode_types::{ConversationId, ToolCall};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Tool results go to stdout; no log file means no logs.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.tricode/logs/tricode.log
    if let Some(dir) = tricode_config::log_dir() {
        candidates.push(dir.join("tricode.log"));
    }

    // Fallback: ./.tricode/logs/tricode.log
    candidates.push(PathBuf::from(".tricode").join("logs").join("tricode.log"));

    candidates
}

#[derive(Debug, PartialEq, Eq)]
enum Calls {
    Script(PathBuf),
    Single { name: String, args: String },
    ListTools,
}

#[derive(Parser, Debug)]
#[command(name = "tricode", version)]
#[command(about = "Run tool calls through the sandboxed Tricode tool runtime")]
#[command(group(
    ArgGroup::new("calls")
        .required(true)
        .args(["script", "list_tools", "tool"])
))]
struct Cli {
    /// Sandbox root (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Allow paths outside the sandbox root
    #[arg(long)]
    bypass_work_dir: bool,

    /// Approve every destructive call without prompting
    #[arg(short = 'y', long)]
    yes: bool,

    /// Do not require a plan decision before other tools
    #[arg(long)]
    no_plan_check: bool,

    /// Conversation id used to persist plan state
    #[arg(long, value_name = "ID")]
    session: Option<String>,

    /// File with one JSON tool call per line
    #[arg(long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Print the tool manifest as JSON
    #[arg(long)]
    list_tools: bool,

    /// Tool to call
    tool: Option<String>,

    /// JSON arguments for TOOL
    #[arg(value_name = "JSON_ARGS")]
    args: Option<String>,
}

impl Cli {
    fn calls(&self) -> Calls {
        if let Some(path) = &self.script {
            Calls::Script(path.clone())
        } else if self.list_tools {
            Calls::ListTools
        } else {
            Calls::Single {
                name: self.tool.clone().unwrap_or_default(),
                args: self.args.clone().unwrap_or_else(|| "{}".to_string()),
            }
        }
    }
}

/// One JSON object per line; blank lines and `#` comments are skipped.
fn parse_script(text: &str) -> Result<Vec<ToolCall>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("script line {}", i + 1))
        })
        .collect()
}

fn load_calls(calls: &Calls) -> Result<Vec<ToolCall>> {
    match calls {
        Calls::Script(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read script {}", path.display()))?;
            parse_script(&text)
        }
        Calls::Single { name, args } => {
            let args = serde_json::from_str(args).context("tool arguments must be JSON")?;
            Ok(vec![ToolCall::new(name.clone(), args)])
        }
        Calls::ListTools => Ok(Vec::new()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let calls = cli.calls();

    let config = match TricodeConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("warning: {e}; using defaults");
            TricodeConfig::default()
        }
    };
    let mut tools = config.tools();
    tools.sandbox.bypass_work_dir |= cli.bypass_work_dir;
    tools.permissions.bypass |= cli.yes;
    if cli.no_plan_check {
        tools.plan.enforce = false;
    }

    let gate = PermissionGate::from_config(ConfirmationStrategy::terminal(), &tools.permissions);
    let dispatcher = Dispatcher::new(gate)?;

    if calls == Calls::ListTools {
        println!("{}", serde_json::to_string_pretty(&dispatcher.definitions())?);
        return Ok(());
    }
    let calls = load_calls(&calls)?;

    let work_dir = match &cli.work_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let mut ctx = AgentContext::new(&work_dir, &tools)?;
    if let Some(dir) = tricode_config::state_dir() {
        ctx = ctx.with_plan_store(PlanStore::new(dir));
    }
    let conversation = match cli.session {
        Some(id) => ConversationId::new(id)?,
        None => ConversationId::new(uuid::Uuid::new_v4().simple().to_string())?,
    };
    tracing::info!(conversation = %conversation, root = %ctx.sandbox.root().display(), "starting");
    ctx.begin_conversation(conversation);

    for call in calls {
        let outcome = match dispatcher.execute(&mut ctx, &call.name, call.arguments).await {
            Ok(outcome) => outcome,
            Err(terminated) => {
                eprintln!("{terminated}");
                ctx.sessions.shutdown().await;
                std::process::exit(TERMINATE_EXIT_CODE);
            }
        };
        let tag = if outcome.ok { "[OK]" } else { "[FAIL]" };
        println!("{tag} {}", call.name);
        if !outcome.result.is_empty() {
            println!("{}", outcome.result);
        }
        if let Some(reminder) = ctx.plan.reminder() {
            println!("\n{reminder}\n");
        }
    }

    if let Some(reminder) = ctx.plan.final_reminder() {
        println!("\n{reminder}");
    }

    ctx.sessions.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Calls, Cli, parse_script};
    use clap::{CommandFactory, Parser};
    use std::path::PathBuf;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn single_call_with_flags() {
        let cli = Cli::try_parse_from([
            "tricode",
            "--work-dir",
            "/tmp/w",
            "--yes",
            "read_file",
            r#"{"path":"a"}"#,
        ])
        .unwrap();
        assert_eq!(cli.work_dir, Some(PathBuf::from("/tmp/w")));
        assert!(cli.yes);
        assert!(!cli.no_plan_check);
        assert_eq!(
            cli.calls(),
            Calls::Single {
                name: "read_file".into(),
                args: r#"{"path":"a"}"#.into()
            }
        );
    }

    #[test]
    fn tool_without_args_gets_empty_object() {
        let cli = Cli::try_parse_from(["tricode", "list_sessions"]).unwrap();
        assert_eq!(
            cli.calls(),
            Calls::Single {
                name: "list_sessions".into(),
                args: "{}".into()
            }
        );
        let cli = Cli::try_parse_from(["tricode", "--list-tools"]).unwrap();
        assert_eq!(cli.calls(), Calls::ListTools);
    }

    #[test]
    fn call_sources_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["tricode", "--script", "s.jsonl", "read_file"]).is_err());
        assert!(Cli::try_parse_from(["tricode", "--script", "s.jsonl", "--list-tools"]).is_err());
        assert!(Cli::try_parse_from(["tricode"]).is_err());
        assert!(Cli::try_parse_from(["tricode", "--bogus"]).is_err());

        let cli = Cli::try_parse_from(["tricode", "--script", "s.jsonl"]).unwrap();
        assert_eq!(cli.calls(), Calls::Script(PathBuf::from("s.jsonl")));
    }

    #[test]
    fn help_is_not_a_failure() {
        let err = Cli::try_parse_from(["tricode", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn script_lines_become_calls() {
        let calls = parse_script(
            "# setup\n{\"name\":\"plan\",\"arguments\":{\"action\":\"skip\"}}\n\n{\"name\":\"list_sessions\"}\n",
        )
        .unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "plan");
        assert_eq!(calls[1].name, "list_sessions");
        assert!(parse_script("{not json}").is_err());
    }
}
