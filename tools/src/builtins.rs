//! Built-in filesystem and command tool executors.

use std::fmt::Write as _;
use std::path::Path;
use std::time::{Duration, SystemTime};

use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tricode_utils::sha256_hex;

use super::{
    AgentContext, DenialReason, ToolError, ToolExecutor, ToolFut, ToolRegistry, parse_args,
    truncate_output,
};
use crate::config::default_true;
use crate::patch::{EditRequest, PatchEngine};
use crate::plan::PlanTool;
use crate::process::{ChildGuard, apply_sanitized_env, set_new_session, terminate_gracefully};
use crate::session_tools::{
    CloseSessionTool, ListSessionsTool, ReadOutputTool, SendInputTool, StartSessionTool,
};

/// Grace period between SIGTERM and SIGKILL for a timed-out command.
const RUN_KILL_GRACE: Duration = Duration::from_secs(2);
/// How long to wait for pipe readers after the child is gone.
const READER_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct ReadFileTool;

#[derive(Debug, Default)]
pub struct CreateFileTool;

#[derive(Debug, Default)]
pub struct EditFileTool;

#[derive(Debug, Default)]
pub struct ListDirectoryTool;

#[derive(Debug, Default)]
pub struct MkdirTool;

#[derive(Debug, Default)]
pub struct DeleteFileTool;

#[derive(Debug, Default)]
pub struct DeletePathTool;

#[derive(Debug, Default)]
pub struct RunCommandTool;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadFileArgs {
    path: String,
    start_line: Option<u32>,
    end_line: Option<u32>,
    max_bytes: Option<usize>,
    #[serde(default)]
    with_metadata: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateFileArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListDirectoryArgs {
    #[serde(default = "default_dot")]
    path: String,
    #[serde(default)]
    show_hidden: bool,
    #[serde(default)]
    recursive: bool,
}

fn default_dot() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MkdirArgs {
    path: String,
    #[serde(default = "default_true")]
    parents: bool,
    #[serde(default)]
    exist_ok: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteFileArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeletePathArgs {
    path: String,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunCommandArgs {
    command: String,
    timeout: Option<u64>,
}

fn io_failure(tool: &str, path: &str, err: &std::io::Error) -> ToolError {
    match err.kind() {
        std::io::ErrorKind::NotFound => ToolError::NotFound {
            message: format!("Path not found: {path}"),
        },
        std::io::ErrorKind::PermissionDenied => {
            ToolError::failed(tool, format!("Permission denied: {path}"))
        }
        _ => ToolError::failed(tool, format!("{path}: {err}")),
    }
}

fn protect_root(ctx: &AgentContext, resolved: &Path) -> Result<(), ToolError> {
    if ctx.sandbox.is_root(resolved) {
        return Err(ToolError::SandboxViolation(
            DenialReason::WorkRootProtected {
                attempted: resolved.to_path_buf(),
            },
        ));
    }
    Ok(())
}

fn rfc3339(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339()
}

impl ToolExecutor for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read file contents, optionally by line range, optionally with metadata (size, mtime, sha256)"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the working directory" },
                "start_line": { "type": "integer", "minimum": 1, "description": "First line to read (1-indexed)" },
                "end_line": { "type": "integer", "minimum": 1, "description": "Last line to read, inclusive" },
                "max_bytes": { "type": "integer", "minimum": 1, "description": "Truncate content beyond this many bytes" },
                "with_metadata": { "type": "boolean", "default": false, "description": "Return JSON with path, total_lines, size, mtime, sha256 and content" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: ReadFileArgs = parse_args(args)?;
        let mut summary = format!("Read {}", typed.path);
        match (typed.start_line, typed.end_line) {
            (Some(start), Some(end)) => write!(summary, " lines {start}-{end}"),
            (Some(start), None) => write!(summary, " lines {start}-"),
            (None, Some(end)) => write!(summary, " lines 1-{end}"),
            (None, None) => Ok(()),
        }
        .map_err(|e| ToolError::failed("read_file", e))?;
        Ok(summary)
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ReadFileArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_and_validate(&typed.path)?;
            let display = ctx.sandbox.display(&resolved);

            let meta = match tokio::fs::metadata(&resolved).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ToolError::NotFound {
                        message: format!("File not found: {display}"),
                    });
                }
                Err(e) => return Err(io_failure("read_file", &display, &e)),
            };
            if meta.is_dir() {
                return Err(ToolError::bad_args(format!(
                    "{display} is a directory; use list_directory"
                )));
            }

            let bytes = tokio::fs::read(&resolved)
                .await
                .map_err(|e| io_failure("read_file", &display, &e))?;
            let text = String::from_utf8_lossy(&bytes);
            let lines: Vec<&str> = text.split_inclusive('\n').collect();
            let total_lines = lines.len();

            let content = if typed.start_line.is_none() && typed.end_line.is_none() {
                text.to_string()
            } else {
                let start = typed.start_line.unwrap_or(1) as usize;
                let end = typed.end_line.map_or(total_lines, |e| e as usize);
                if start == 0 || start > end || start > total_lines.max(1) {
                    return Err(ToolError::bad_args(format!(
                        "Invalid range: ({start}, {end}), file has {total_lines} lines"
                    )));
                }
                let end = end.min(total_lines);
                lines.get(start - 1..end).unwrap_or_default().concat()
            };

            let max = typed
                .max_bytes
                .unwrap_or(ctx.limits.max_output_bytes)
                .min(ctx.limits.max_output_bytes);
            let content = truncate_output(content, max);

            if !typed.with_metadata {
                return Ok(content);
            }
            let mtime = meta.modified().ok().map(rfc3339);
            let report = json!({
                "path": display,
                "total_lines": total_lines,
                "size": meta.len(),
                "mtime": mtime,
                "sha256": sha256_hex(&bytes),
                "content": content,
            });
            serde_json::to_string_pretty(&report).map_err(|e| ToolError::failed("read_file", e))
        })
    }
}

impl ToolExecutor for CreateFileTool {
    fn name(&self) -> &'static str {
        "create_file"
    }

    fn description(&self) -> &'static str {
        "Create a new file with the given content, creating parent directories as needed. Fails if the file exists."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to create" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: CreateFileArgs = parse_args(args)?;
        Ok(format!(
            "Create file {} ({} bytes)",
            typed.path,
            typed.content.len()
        ))
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: CreateFileArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_and_validate(&typed.path)?;
            let display = ctx.sandbox.display(&resolved);

            if tokio::fs::symlink_metadata(&resolved).await.is_ok() {
                return Err(ToolError::Conflict {
                    message: format!(
                        "File already exists: {display}. Use edit_file to modify existing files."
                    ),
                });
            }

            if let Some(parent) = resolved.parent()
                && !parent.exists()
            {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ToolError::failed(
                        "create_file",
                        format!("failed to create parent directories for {display}: {e}"),
                    )
                })?;
            }

            let byte_len = typed.content.len();
            let bytes = typed.content.into_bytes();
            let write_path = resolved.clone();
            tokio::task::spawn_blocking(move || tricode_utils::atomic_write(&write_path, &bytes))
                .await
                .map_err(|e| ToolError::failed("create_file", e))?
                .map_err(|e| {
                    ToolError::failed("create_file", format!("failed to write {display}: {e}"))
                })?;

            let display_path = display.as_str();
            tracing::debug!(path = display_path, bytes = byte_len, "file created");
            Ok(format!("Successfully created {display} ({byte_len} bytes)"))
        })
    }
}

impl ToolExecutor for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> &'static str {
        "Edit a file. mode=patch applies anchored hunks (replace, insert_before, insert_after, delete); \
         overwrite/append/prepend take whole content. Supports dry_run and a sha256 precondition. \
         Returns the unified diff and before/after hashes."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "mode": {
                    "type": "string",
                    "enum": ["patch", "overwrite", "append", "prepend"],
                    "default": "patch"
                },
                "content": { "type": "string", "description": "Content for overwrite, append or prepend" },
                "hunks": {
                    "type": "array",
                    "description": "Edits applied in order, each against the result of the previous one",
                    "items": {
                        "type": "object",
                        "properties": {
                            "op": { "type": "string", "enum": ["replace", "insert_before", "insert_after", "delete"] },
                            "anchor": {
                                "type": "object",
                                "properties": {
                                    "type": { "type": "string", "enum": ["exact", "regex"] },
                                    "pattern": { "type": "string" },
                                    "occurrence": { "type": "string", "enum": ["first", "last"] },
                                    "nth": { "type": "integer", "minimum": 1 },
                                    "dotall": { "type": "boolean" },
                                    "ignorecase": { "type": "boolean" },
                                    "range": {
                                        "type": "array",
                                        "items": { "type": "integer", "minimum": 1 },
                                        "minItems": 2,
                                        "maxItems": 2,
                                        "description": "[start_line, end_line] window to search in"
                                    }
                                },
                                "required": ["type", "pattern"],
                                "additionalProperties": false
                            },
                            "content": { "type": "string" },
                            "must_unique": { "type": "boolean", "default": true }
                        },
                        "required": ["op", "anchor"],
                        "additionalProperties": false
                    }
                },
                "precondition": {
                    "type": "object",
                    "properties": { "file_sha256": { "type": "string" } },
                    "required": ["file_sha256"],
                    "additionalProperties": false
                },
                "dry_run": { "type": "boolean", "default": false }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn is_significant(&self, args: &serde_json::Value) -> bool {
        !args
            .get("dry_run")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: EditRequest = parse_args(args)?;
        let detail = if typed.mode.is_simple() {
            typed.mode.as_str().to_string()
        } else {
            format!("{} hunk(s)", typed.hunks.len())
        };
        let dry = if typed.dry_run { " (dry run)" } else { "" };
        Ok(format!("Edit {} [{detail}]{dry}", typed.path))
    }

    fn approval_preview(&self, args: &serde_json::Value, ctx: &AgentContext) -> Option<String> {
        let typed: EditRequest = parse_args(args).ok()?;
        match PatchEngine::new(&ctx.sandbox).preview(&typed) {
            Ok(result) if result.diff.is_empty() => Some("(no changes)".to_string()),
            Ok(result) => Some(result.diff),
            Err(e) => Some(format!("(preview unavailable: {e})")),
        }
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: EditRequest = parse_args(&args)?;
            let result = PatchEngine::new(&ctx.sandbox).edit(&typed)?;
            serde_json::to_string_pretty(&result).map_err(|e| ToolError::failed("edit_file", e))
        })
    }
}

impl ToolExecutor for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn description(&self) -> &'static str {
        "List directory entries in ls -l style (mode, size, mtime, name). recursive=true lists subdirectories in ls -R sections."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "default": "." },
                "show_hidden": { "type": "boolean", "default": false },
                "recursive": { "type": "boolean", "default": false }
            },
            "additionalProperties": false
        })
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: ListDirectoryArgs = parse_args(args)?;
        Ok(format!("List {}", typed.path))
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ListDirectoryArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_and_validate(&typed.path)?;
            let display = ctx.sandbox.display(&resolved);

            let meta = std::fs::metadata(&resolved).map_err(|e| io_failure("list_directory", &display, &e))?;
            if !meta.is_dir() {
                return Err(ToolError::bad_args(format!("Not a directory: {display}")));
            }

            let root_entries = list_entries(ctx, &resolved, typed.show_hidden)?;
            if !typed.recursive {
                if root_entries.is_empty() {
                    return Ok("Empty directory".to_string());
                }
                return Ok(truncate_output(
                    root_entries.join("\n"),
                    ctx.limits.max_output_bytes,
                ));
            }

            let mut sections = Vec::new();
            let walker = WalkBuilder::new(&resolved)
                .standard_filters(false)
                .hidden(!typed.show_hidden)
                .sort_by_file_name(std::cmp::Ord::cmp)
                .build();
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!("skipping unreadable entry: {e}");
                        continue;
                    }
                };
                if !entry.file_type().is_some_and(|t| t.is_dir()) {
                    continue;
                }
                let dir = entry.path();
                if dir != resolved && ctx.sandbox.validate(dir).is_err() {
                    continue;
                }
                let header = match dir.strip_prefix(&resolved) {
                    Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
                    Ok(rel) => format!("./{}", rel.display()),
                    Err(_) => dir.display().to_string(),
                };
                let entries = if dir == resolved {
                    root_entries.clone()
                } else {
                    list_entries(ctx, dir, typed.show_hidden)?
                };
                let mut section = format!("{header}:");
                for line in entries {
                    section.push('\n');
                    section.push_str(&line);
                }
                sections.push(section);
            }

            if root_entries.is_empty() {
                return Ok("Empty directory".to_string());
            }
            Ok(truncate_output(
                sections.join("\n\n"),
                ctx.limits.max_output_bytes,
            ))
        })
    }
}

fn list_entries(ctx: &AgentContext, dir: &Path, show_hidden: bool) -> Result<Vec<String>, ToolError> {
    let display = ctx.sandbox.display(dir);
    let mut entries: Vec<(String, std::fs::Metadata)> = Vec::new();
    let read = std::fs::read_dir(dir).map_err(|e| io_failure("list_directory", &display, &e))?;
    for entry in read.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !show_hidden && name.starts_with('.') {
            continue;
        }
        if ctx.sandbox.validate(&entry.path()).is_err() {
            continue;
        }
        match entry.path().symlink_metadata() {
            Ok(meta) => entries.push((name, meta)),
            Err(e) => tracing::debug!(name, "skipping entry without metadata: {e}"),
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries
        .iter()
        .map(|(name, meta)| format_entry(name, meta))
        .collect())
}

fn format_entry(name: &str, meta: &std::fs::Metadata) -> String {
    let mtime = meta.modified().map_or_else(
        |_| "?".to_string(),
        |t| {
            chrono::DateTime::<chrono::Local>::from(t)
                .format("%b %d %H:%M")
                .to_string()
        },
    );
    let suffix = if meta.is_dir() { "/" } else { "" };
    format!("{} {:>8} {mtime} {name}{suffix}", mode_string(meta), meta.len())
}

fn mode_string(meta: &std::fs::Metadata) -> String {
    let kind = if meta.file_type().is_symlink() {
        'l'
    } else if meta.is_dir() {
        'd'
    } else {
        '-'
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = meta.permissions().mode();
        for shift in [6u32, 3, 0] {
            let bits = (mode >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
    }
    #[cfg(not(unix))]
    out.push_str(if meta.permissions().readonly() {
        "r--r--r--"
    } else {
        "rw-rw-rw-"
    });
    out
}

impl ToolExecutor for MkdirTool {
    fn name(&self) -> &'static str {
        "mkdir"
    }

    fn description(&self) -> &'static str {
        "Create a directory (parents by default)"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "parents": { "type": "boolean", "default": true },
                "exist_ok": { "type": "boolean", "default": false }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: MkdirArgs = parse_args(args)?;
        Ok(format!("Create directory {}", typed.path))
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: MkdirArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_and_validate(&typed.path)?;
            let display = ctx.sandbox.display(&resolved);

            if let Ok(meta) = tokio::fs::metadata(&resolved).await {
                if meta.is_dir() && typed.exist_ok {
                    return Ok(format!("Directory already exists: {display}"));
                }
                return Err(ToolError::Conflict {
                    message: format!("Path already exists: {display}"),
                });
            }

            let created = if typed.parents {
                tokio::fs::create_dir_all(&resolved).await
            } else {
                tokio::fs::create_dir(&resolved).await
            };
            created.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ToolError::NotFound {
                    message: format!("Parent directory of {display} does not exist (pass parents=true)"),
                },
                _ => io_failure("mkdir", &display, &e),
            })?;
            Ok(format!("Created directory {display}"))
        })
    }
}

impl ToolExecutor for DeleteFileTool {
    fn name(&self) -> &'static str {
        "delete_file"
    }

    fn description(&self) -> &'static str {
        "Delete a single file (not a directory)"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: DeleteFileArgs = parse_args(args)?;
        Ok(format!("Delete file {}", typed.path))
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: DeleteFileArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_and_validate(&typed.path)?;
            protect_root(ctx, &resolved)?;
            let display = ctx.sandbox.display(&resolved);

            let meta = tokio::fs::symlink_metadata(&resolved)
                .await
                .map_err(|e| io_failure("delete_file", &display, &e))?;
            if meta.is_dir() {
                return Err(ToolError::bad_args(format!(
                    "{display} is a directory; use delete_path"
                )));
            }
            tokio::fs::remove_file(&resolved)
                .await
                .map_err(|e| io_failure("delete_file", &display, &e))?;
            Ok(format!("Deleted file {display}"))
        })
    }
}

impl ToolExecutor for DeletePathTool {
    fn name(&self) -> &'static str {
        "delete_path"
    }

    fn description(&self) -> &'static str {
        "Delete a file or directory. Non-empty directories need recursive=true."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "recursive": { "type": "boolean", "default": false }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: DeletePathArgs = parse_args(args)?;
        if typed.recursive {
            Ok(format!("Recursively delete {}", typed.path))
        } else {
            Ok(format!("Delete {}", typed.path))
        }
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: DeletePathArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_and_validate(&typed.path)?;
            protect_root(ctx, &resolved)?;
            let display = ctx.sandbox.display(&resolved);

            let meta = tokio::fs::symlink_metadata(&resolved)
                .await
                .map_err(|e| io_failure("delete_path", &display, &e))?;
            if !meta.is_dir() {
                tokio::fs::remove_file(&resolved)
                    .await
                    .map_err(|e| io_failure("delete_path", &display, &e))?;
                return Ok(format!("Deleted file {display}"));
            }

            if typed.recursive {
                tokio::fs::remove_dir_all(&resolved)
                    .await
                    .map_err(|e| io_failure("delete_path", &display, &e))?;
                return Ok(format!("Deleted directory {display} (recursive)"));
            }
            let mut read = tokio::fs::read_dir(&resolved)
                .await
                .map_err(|e| io_failure("delete_path", &display, &e))?;
            if read
                .next_entry()
                .await
                .map_err(|e| io_failure("delete_path", &display, &e))?
                .is_some()
            {
                return Err(ToolError::Conflict {
                    message: format!("Directory not empty: {display} (pass recursive=true)"),
                });
            }
            tokio::fs::remove_dir(&resolved)
                .await
                .map_err(|e| io_failure("delete_path", &display, &e))?;
            Ok(format!("Deleted directory {display}"))
        })
    }
}

impl ToolExecutor for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the working directory and return stdout plus a [stderr] section. Non-zero exit is a failure."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "timeout": { "type": "integer", "minimum": 1, "default": 30, "description": "Seconds before the command is killed" }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn approval_summary(&self, args: &serde_json::Value) -> Result<String, ToolError> {
        let typed: RunCommandArgs = parse_args(args)?;
        Ok(format!("Run command: {}", typed.command))
    }

    fn execute<'a>(&'a self, args: serde_json::Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: RunCommandArgs = parse_args(&args)?;
            if typed.command.trim().is_empty() {
                return Err(ToolError::bad_args("command must not be empty"));
            }
            let timeout = typed
                .timeout
                .map_or(ctx.limits.run_timeout, Duration::from_secs);
            let max_output = ctx.limits.max_output_bytes;

            let mut command = Command::new(&ctx.run_shell.binary);
            command
                .args(ctx.run_shell.command_args(&typed.command))
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .current_dir(ctx.sandbox.root());
            apply_sanitized_env(&mut command, &ctx.env_sanitizer);
            set_new_session(&mut command, true);

            let child = command
                .spawn()
                .map_err(|e| ToolError::failed("run_command", e))?;
            let mut guard = ChildGuard::new(child);
            let Some(child) = guard.child_mut() else {
                return Err(ToolError::failed("run_command", "child process unavailable"));
            };
            tracing::debug!(pid = child.id(), shell = %ctx.run_shell, "command spawned");

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| ToolError::failed("run_command", "Failed to capture stdout"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| ToolError::failed("run_command", "Failed to capture stderr"))?;
            let stdout_task = tokio::spawn(read_stream(stdout, max_output + 1));
            let stderr_task = tokio::spawn(read_stream(stderr, max_output + 1));

            let waited = tokio::time::timeout(timeout, child.wait()).await;
            let status = match waited {
                Ok(status) => Some(status.map_err(|e| ToolError::failed("run_command", e))?),
                Err(_) => {
                    tracing::warn!(
                        command = %typed.command,
                        secs = timeout.as_secs(),
                        "command timed out"
                    );
                    terminate_gracefully(child, RUN_KILL_GRACE).await;
                    None
                }
            };
            guard.disarm();

            let stdout_content = drain(stdout_task).await;
            let stderr_content = drain(stderr_task).await;
            let mut output = stdout_content;
            if !stderr_content.trim().is_empty() {
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str("[stderr]\n");
                output.push_str(&stderr_content);
            }
            let output = truncate_output(output, max_output);

            let Some(status) = status else {
                let output = if output.trim().is_empty() {
                    String::new()
                } else {
                    format!("\n\n{output}")
                };
                return Err(ToolError::Timeout {
                    tool: "run_command".to_string(),
                    secs: timeout.as_secs(),
                    output,
                });
            };

            if !status.success() {
                let exit_code = status.code().unwrap_or(-1);
                let message = if output.trim().is_empty() {
                    format!("exit code {exit_code}")
                } else {
                    format!("exit code {exit_code}\n\n{output}")
                };
                return Err(ToolError::failed("run_command", message));
            }
            Ok(output)
        })
    }
}

async fn read_stream<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    max_collect: usize,
) -> String {
    let mut buf = [0u8; 4096];
    let mut collected = String::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if collected.len() >= max_collect {
            continue;
        }
        let chunk = String::from_utf8_lossy(&buf[..n]);
        let remaining = max_collect - collected.len();
        let mut take = remaining.min(chunk.len());
        while take > 0 && !chunk.is_char_boundary(take) {
            take -= 1;
        }
        collected.push_str(&chunk[..take]);
    }
    collected
}

async fn drain(task: tokio::task::JoinHandle<String>) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(READER_DRAIN, task).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

/// Register every built-in tool.
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    registry.register(Box::new(PlanTool))?;
    registry.register(Box::new(ReadFileTool))?;
    registry.register(Box::new(CreateFileTool))?;
    registry.register(Box::new(EditFileTool))?;
    registry.register(Box::new(ListDirectoryTool))?;
    registry.register(Box::new(MkdirTool))?;
    registry.register(Box::new(DeleteFileTool))?;
    registry.register(Box::new(DeletePathTool))?;
    registry.register(Box::new(RunCommandTool))?;
    registry.register(Box::new(StartSessionTool))?;
    registry.register(Box::new(SendInputTool))?;
    registry.register(Box::new(ReadOutputTool))?;
    registry.register(Box::new(CloseSessionTool))?;
    registry.register(Box::new(ListSessionsTool))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    use super::{
        CreateFileTool, DeleteFileTool, DeletePathTool, EditFileTool, ListDirectoryTool,
        MkdirTool, ReadFileTool, RunCommandTool, register_builtins,
    };
    use crate::config::ToolsConfig;
    use crate::{AgentContext, ToolError, ToolExecutor, ToolRegistry};

    fn context() -> (TempDir, AgentContext) {
        let dir = tempdir().unwrap();
        let ctx = AgentContext::new(dir.path(), &ToolsConfig::default()).unwrap();
        (dir, ctx)
    }

    #[test]
    fn destructive_set_matches_registry() {
        let mut registry = ToolRegistry::default();
        register_builtins(&mut registry).unwrap();
        assert_eq!(
            registry.destructive_tools(),
            vec![
                "close_session",
                "create_file",
                "delete_file",
                "delete_path",
                "edit_file",
                "mkdir",
                "run_command",
                "send_input",
                "start_session",
            ]
        );
        assert!(matches!(
            register_builtins(&mut registry),
            Err(ToolError::DuplicateTool { .. })
        ));
    }

    #[tokio::test]
    async fn read_file_ranges_and_metadata() {
        let (dir, mut ctx) = context();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();

        let out = ReadFileTool
            .execute(json!({"path": "a.txt", "start_line": 2, "end_line": 3}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out, "two\nthree\n");

        let err = ReadFileTool
            .execute(json!({"path": "a.txt", "start_line": 5}), &mut ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("file has 3 lines"));

        let out = ReadFileTool
            .execute(json!({"path": "a.txt", "with_metadata": true}), &mut ctx)
            .await
            .unwrap();
        let meta: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(meta["path"], "a.txt");
        assert_eq!(meta["total_lines"], 3);
        assert_eq!(meta["size"], 14);
        assert_eq!(
            meta["sha256"],
            tricode_utils::sha256_hex(b"one\ntwo\nthree\n")
        );
        assert_eq!(meta["content"], "one\ntwo\nthree\n");

        let err = ReadFileTool
            .execute(json!({"path": "missing.txt"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
    }

    #[tokio::test]
    async fn read_file_truncates_to_max_bytes() {
        let (dir, mut ctx) = context();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(100)).unwrap();
        let out = ReadFileTool
            .execute(json!({"path": "big.txt", "max_bytes": 10}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out, format!("{}\n{}", "x".repeat(10), crate::TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn create_file_refuses_existing_and_makes_parents() {
        let (dir, mut ctx) = context();
        let out = CreateFileTool
            .execute(json!({"path": "sub/dir/new.txt", "content": "hi"}), &mut ctx)
            .await
            .unwrap();
        assert!(out.contains("Successfully created sub/dir/new.txt"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("sub/dir/new.txt")).unwrap(),
            "hi"
        );

        let err = CreateFileTool
            .execute(json!({"path": "sub/dir/new.txt", "content": "again"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("Use edit_file to modify existing files.")
        );
    }

    #[tokio::test]
    async fn edit_file_dry_run_is_not_significant() {
        let (dir, mut ctx) = context();
        std::fs::write(dir.path().join("f.txt"), "foo\n").unwrap();
        let args = json!({
            "path": "f.txt",
            "hunks": [{"op": "replace", "anchor": {"type": "exact", "pattern": "foo"}, "content": "bar"}],
            "dry_run": true
        });
        assert!(!EditFileTool.is_significant(&args));
        let preview = EditFileTool.approval_preview(&args, &ctx).unwrap();
        assert!(preview.contains("+bar"));

        let out = EditFileTool.execute(args, &mut ctx).await.unwrap();
        let result: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(result["dry_run"], true);
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "foo\n");
    }

    #[tokio::test]
    async fn list_directory_formats_entries() {
        let (dir, mut ctx) = context();
        let out = ListDirectoryTool.execute(json!({}), &mut ctx).await.unwrap();
        assert_eq!(out, "Empty directory");

        std::fs::write(dir.path().join("b.txt"), "12345").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/inner.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();

        let out = ListDirectoryTool.execute(json!({}), &mut ctx).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('d') && lines[0].ends_with(" a/"));
        assert!(lines[1].starts_with('-') && lines[1].ends_with(" b.txt"));
        assert!(lines[1].contains("       5 "));

        let out = ListDirectoryTool
            .execute(json!({"show_hidden": true}), &mut ctx)
            .await
            .unwrap();
        assert!(out.contains(".hidden"));

        let out = ListDirectoryTool
            .execute(json!({"recursive": true}), &mut ctx)
            .await
            .unwrap();
        assert!(out.starts_with(".:\n"));
        assert!(out.contains("\n\n./a:\n"));
        assert!(out.contains("inner.txt"));
    }

    #[tokio::test]
    async fn list_directory_hides_denied_entries() {
        let (dir, mut ctx) = context();
        std::fs::write(dir.path().join("server.pem"), "secret").unwrap();
        std::fs::write(dir.path().join("ok.txt"), "").unwrap();
        let out = ListDirectoryTool.execute(json!({}), &mut ctx).await.unwrap();
        assert!(out.contains("ok.txt"));
        assert!(!out.contains("server.pem"));
    }

    #[tokio::test]
    async fn mkdir_and_delete() {
        let (dir, mut ctx) = context();
        MkdirTool
            .execute(json!({"path": "x/y"}), &mut ctx)
            .await
            .unwrap();
        assert!(dir.path().join("x/y").is_dir());

        let err = MkdirTool
            .execute(json!({"path": "x/y"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Conflict { .. }));
        MkdirTool
            .execute(json!({"path": "x/y", "exist_ok": true}), &mut ctx)
            .await
            .unwrap();
        let err = MkdirTool
            .execute(json!({"path": "p/q", "parents": false}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));

        let err = DeleteFileTool
            .execute(json!({"path": "x"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));

        let err = DeletePathTool
            .execute(json!({"path": "x"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Conflict { .. }));
        DeletePathTool
            .execute(json!({"path": "x", "recursive": true}), &mut ctx)
            .await
            .unwrap();
        assert!(!dir.path().join("x").exists());
    }

    #[tokio::test]
    async fn deleting_the_root_is_refused() {
        let (dir, mut ctx) = context();
        let tools: [&dyn ToolExecutor; 2] = [&DeleteFileTool, &DeletePathTool];
        for tool in tools {
            let err = tool
                .execute(json!({"path": "."}), &mut ctx)
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::SandboxViolation(_)), "{err}");
        }
        let err = DeletePathTool
            .execute(
                json!({"path": dir.path().to_string_lossy(), "recursive": true}),
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));
        assert!(dir.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_command_captures_streams_and_failures() {
        let (_dir, mut ctx) = context();
        let out = RunCommandTool
            .execute(json!({"command": "echo out; echo err 1>&2"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out, "out\n[stderr]\nerr\n");

        let err = RunCommandTool
            .execute(json!({"command": "echo nope; exit 3"}), &mut ctx)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exit code 3"));
        assert!(message.contains("nope"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_command_times_out() {
        let (_dir, mut ctx) = context();
        let started = std::time::Instant::now();
        let err = RunCommandTool
            .execute(json!({"command": "echo started; sleep 30", "timeout": 1}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { secs: 1, .. }));
        assert!(err.to_string().contains("started"));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
