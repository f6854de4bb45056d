//! Tool executors for interactive shell sessions.

use std::fmt::Write as _;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tricode_types::SessionId;

use super::{AgentContext, ToolError, ToolExecutor, ToolFut, parse_args};
use crate::shell::session_shell;

const DEFAULT_READ_TIMEOUT_SECS: f64 = 2.0;
/// Upper bound on a single `read_output` wait.
const MAX_READ_TIMEOUT_SECS: f64 = 60.0;

#[derive(Debug, Default)]
pub struct StartSessionTool;

#[derive(Debug, Default)]
pub struct SendInputTool;

#[derive(Debug, Default)]
pub struct ReadOutputTool;

#[derive(Debug, Default)]
pub struct CloseSessionTool;

#[derive(Debug, Default)]
pub struct ListSessionsTool;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StartSessionArgs {
    command: Option<String>,
    shell: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SendInputArgs {
    session_id: SessionId,
    input_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadOutputArgs {
    session_id: SessionId,
    timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionIdArgs {
    session_id: SessionId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

fn session_id_schema() -> serde_json::Value {
    json!({
        "type": "string",
        "pattern": "^[0-9a-fA-F]{8}$",
        "description": "Id returned by start_session"
    })
}

impl ToolExecutor for StartSessionTool {
    fn name(&self) -> &'static str {
        "start_session"
    }

    fn description(&self) -> &'static str {
        "Start an interactive shell session in the working directory. Returns a session id for send_input, read_output and close_session."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command sent to the shell right after it starts" },
                "shell": { "type": "string", "default": "/bin/bash" }
            },
            "additionalProperties": false
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: StartSessionArgs = parse_args(args)?;
        let shell = typed.shell.as_deref().unwrap_or("default shell");
        Ok(match typed.command {
            Some(command) => format!("Start session ({shell}): {command}"),
            None => format!("Start session ({shell})"),
        })
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: StartSessionArgs = parse_args(&args)?;
            let shell = session_shell(typed.shell.as_deref(), Some(&ctx.shell_config));
            let id = ctx.sessions.start(typed.command.as_deref(), &shell).await?;
            Ok(format!("Session {id} started ({shell})"))
        })
    }
}

impl ToolExecutor for SendInputTool {
    fn name(&self) -> &'static str {
        "send_input"
    }

    fn description(&self) -> &'static str {
        "Send a line of input to a session's stdin"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": session_id_schema(),
                "input_text": { "type": "string", "description": "Text to send; a newline is appended" }
            },
            "required": ["session_id", "input_text"],
            "additionalProperties": false
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: SendInputArgs = parse_args(args)?;
        Ok(format!(
            "Send to session {}: {}",
            typed.session_id, typed.input_text
        ))
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: SendInputArgs = parse_args(&args)?;
            ctx.sessions
                .send(&typed.session_id, &typed.input_text)
                .await?;
            Ok(format!("Sent input to session {}", typed.session_id))
        })
    }
}

impl ToolExecutor for ReadOutputTool {
    fn name(&self) -> &'static str {
        "read_output"
    }

    fn description(&self) -> &'static str {
        "Read pending output from a session, waiting up to timeout seconds. stderr lines are prefixed with [stderr]."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": session_id_schema(),
                "timeout": { "type": "number", "minimum": 0, "default": 2 }
            },
            "required": ["session_id"],
            "additionalProperties": false
        })
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: ReadOutputArgs = parse_args(args)?;
        Ok(format!("Read output of session {}", typed.session_id))
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ReadOutputArgs = parse_args(&args)?;
            let secs = typed.timeout.unwrap_or(DEFAULT_READ_TIMEOUT_SECS);
            if !secs.is_finite() || secs < 0.0 {
                return Err(ToolError::bad_args("timeout must be a non-negative number"));
            }
            let timeout = Duration::from_secs_f64(secs.min(MAX_READ_TIMEOUT_SECS));
            ctx.sessions.read(&typed.session_id, timeout).await
        })
    }
}

impl ToolExecutor for CloseSessionTool {
    fn name(&self) -> &'static str {
        "close_session"
    }

    fn description(&self) -> &'static str {
        "Terminate a session and its process group"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "session_id": session_id_schema() },
            "required": ["session_id"],
            "additionalProperties": false
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn is_significant(&self, _args: &serde_json::Value) -> bool {
        false
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: SessionIdArgs = parse_args(args)?;
        Ok(format!("Close session {}", typed.session_id))
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: SessionIdArgs = parse_args(&args)?;
            ctx.sessions.close(&typed.session_id).await?;
            Ok(format!("Session {} closed", typed.session_id))
        })
    }
}

impl ToolExecutor for ListSessionsTool {
    fn name(&self) -> &'static str {
        "list_sessions"
    }

    fn description(&self) -> &'static str {
        "List interactive sessions with their age, idle time and initial command"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn approval_summary(&self, _args: &serde_json::Value) -> Result<String, ToolError> {
        Ok("List sessions".to_string())
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let _: NoArgs = parse_args(&args)?;
            let sessions = ctx.sessions.list().await;
            if sessions.is_empty() {
                return Ok("No active sessions".to_string());
            }
            let mut out = String::new();
            for info in sessions {
                let state = if info.alive { "running" } else { "exited" };
                let _ = write!(
                    out,
                    "{} {state} age={}s idle={}s shell={}",
                    info.id,
                    info.age.as_secs(),
                    info.idle.as_secs(),
                    info.shell
                );
                if let Some(command) = info.initial_command {
                    let _ = write!(out, " command={command}");
                }
                out.push('\n');
            }
            Ok(out.trim_end().to_string())
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::{
        CloseSessionTool, ListSessionsTool, ReadOutputTool, SendInputTool, StartSessionTool,
    };
    use crate::config::ToolsConfig;
    use crate::{AgentContext, ToolError, ToolExecutor};

    fn session_id(started: &str) -> String {
        started
            .split_whitespace()
            .nth(1)
            .expect("session id in start message")
            .to_string()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_tools_round_trip() {
        let dir = tempdir().unwrap();
        let mut ctx = AgentContext::new(dir.path(), &ToolsConfig::default()).unwrap();

        let started = StartSessionTool
            .execute(json!({"shell": "/bin/sh"}), &mut ctx)
            .await
            .unwrap();
        let id = session_id(&started);
        assert_eq!(id.len(), 8);

        SendInputTool
            .execute(json!({"session_id": id, "input_text": "echo ready"}), &mut ctx)
            .await
            .unwrap();
        let out = ReadOutputTool
            .execute(json!({"session_id": id, "timeout": 2}), &mut ctx)
            .await
            .unwrap();
        assert!(out.contains("ready"));

        let listed = ListSessionsTool.execute(json!({}), &mut ctx).await.unwrap();
        assert!(listed.starts_with(&id));
        assert!(listed.contains("shell=/bin/sh"));

        CloseSessionTool
            .execute(json!({"session_id": id}), &mut ctx)
            .await
            .unwrap();
        let listed = ListSessionsTool.execute(json!({}), &mut ctx).await.unwrap();
        assert_eq!(listed, "No active sessions");

        let err = ReadOutputTool
            .execute(json!({"session_id": id}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
    }

    #[tokio::test]
    async fn malformed_session_id_is_bad_args() {
        let dir = tempdir().unwrap();
        let mut ctx = AgentContext::new(dir.path(), &ToolsConfig::default()).unwrap();
        let err = CloseSessionTool
            .execute(json!({"session_id": "xyz"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }
}
