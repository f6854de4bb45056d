//! Anchor-based text patching with dry-run, diff and precondition support.

use std::ops::Range;
use std::path::Path;

use regex::RegexBuilder;
use serde::Deserialize;
use tricode_types::{
    Anchor, AnchorKind, EditMode, EditResult, Hunk, HunkOp, LineRange, MatchRecord, Occurrence,
    Precondition,
};
use tricode_utils::{
    AtomicWriteOptions, StagedWrite, compute_diff_stats, sha256_hex, sha256_matches, unified_diff,
};

use crate::ToolError;
use crate::sandbox::PathSandbox;

/// Longest snippet of original text reported per applied hunk.
const SNIPPET_CHARS: usize = 120;

/// Arguments of one `edit_file` call.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditRequest {
    pub path: String,
    #[serde(default)]
    pub mode: EditMode,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub hunks: Vec<Hunk>,
    #[serde(default)]
    pub precondition: Option<Precondition>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Applies [`EditRequest`]s to files under a [`PathSandbox`].
#[derive(Debug, Clone, Copy)]
pub struct PatchEngine<'a> {
    sandbox: &'a PathSandbox,
}

impl<'a> PatchEngine<'a> {
    #[must_use]
    pub fn new(sandbox: &'a PathSandbox) -> Self {
        Self { sandbox }
    }

    /// Run `request` without writing anything, whatever its `dry_run` flag.
    pub fn preview(&self, request: &EditRequest) -> Result<EditResult, ToolError> {
        self.run(request, true)
    }

    pub fn edit(&self, request: &EditRequest) -> Result<EditResult, ToolError> {
        self.run(request, request.dry_run)
    }

    fn run(&self, request: &EditRequest, dry_run: bool) -> Result<EditResult, ToolError> {
        let path = self.sandbox.resolve_and_validate(&request.path)?;
        let display = self.sandbox.display(&path);

        if path.is_dir() {
            return Err(ToolError::bad_args(format!("{display} is a directory")));
        }
        let exists = path.is_file();
        if !exists && request.mode != EditMode::Overwrite {
            return Err(ToolError::NotFound {
                message: format!("File not found: {display}"),
            });
        }

        let old_bytes = if exists {
            std::fs::read(&path).map_err(|e| ToolError::failed("edit_file", e))?
        } else {
            Vec::new()
        };

        if let Some(pre) = &request.precondition
            && !sha256_matches(&pre.file_sha256, &old_bytes)
        {
            return Err(ToolError::Conflict {
                message: format!(
                    "precondition failed for {display}: expected sha256 {}, found {}",
                    pre.file_sha256.trim(),
                    sha256_hex(&old_bytes)
                ),
            });
        }

        let old_text = String::from_utf8(old_bytes).map_err(|_| {
            ToolError::failed("edit_file", format!("{display} is not valid UTF-8 text"))
        })?;

        let (new_text, matches) = match request.mode {
            EditMode::Patch => {
                if request.content.is_some() {
                    return Err(ToolError::bad_args(
                        "content is only valid for overwrite, append or prepend; use hunks in patch mode",
                    ));
                }
                apply_hunks(&old_text, &request.hunks)?
            }
            mode => {
                if !request.hunks.is_empty() {
                    return Err(ToolError::bad_args(format!(
                        "hunks are only valid in patch mode, not {mode}"
                    )));
                }
                let content = request.content.as_deref().ok_or_else(|| {
                    ToolError::bad_args(format!("content is required for mode {mode}"))
                })?;
                (apply_simple(mode, &old_text, content), Vec::new())
            }
        };

        let diff = unified_diff(&display, &old_text, &new_text);
        let stats = compute_diff_stats(&old_text, &new_text);
        let sha_before = sha256_hex(old_text.as_bytes());
        let sha_after = sha256_hex(new_text.as_bytes());

        if !dry_run && (!exists || new_text != old_text) {
            commit(&path, new_text.as_bytes())?;
            let display_path = display.as_str();
            tracing::debug!(
                path = display_path,
                mode = %request.mode,
                additions = stats.additions,
                deletions = stats.deletions,
                "edit committed"
            );
        }

        Ok(EditResult {
            path: display,
            mode: request.mode,
            applied: !dry_run,
            dry_run,
            diff,
            sha_before,
            sha_after,
            additions: stats.additions,
            deletions: stats.deletions,
            matches,
        })
    }
}

fn commit(path: &Path, bytes: &[u8]) -> Result<(), ToolError> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            ToolError::failed(
                "edit_file",
                format!("failed to create {}: {e}", parent.display()),
            )
        })?;
    }
    StagedWrite::stage(path, bytes, AtomicWriteOptions::preserving(path))
        .and_then(StagedWrite::commit)
        .map_err(|e| ToolError::failed("edit_file", format!("failed to write {}: {e}", path.display())))
}

fn apply_simple(mode: EditMode, old: &str, content: &str) -> String {
    match mode {
        EditMode::Overwrite | EditMode::Patch => content.to_string(),
        EditMode::Append => format!("{old}{content}"),
        EditMode::Prepend => format!("{content}{old}"),
    }
}

/// Apply `hunks` in order, each against the text produced by the previous one.
pub fn apply_hunks(text: &str, hunks: &[Hunk]) -> Result<(String, Vec<MatchRecord>), ToolError> {
    if hunks.is_empty() {
        return Err(ToolError::bad_args(
            "patch mode requires at least one hunk",
        ));
    }

    let mut current = text.to_string();
    let mut records = Vec::with_capacity(hunks.len());
    for (index, hunk) in hunks.iter().enumerate() {
        let content = match (hunk.op.needs_content(), hunk.content.as_deref()) {
            (true, None) => {
                return Err(ToolError::bad_args(format!(
                    "hunk {}: content is required for {}",
                    index + 1,
                    hunk.op
                )));
            }
            (true, Some(content)) => content,
            (false, _) => "",
        };

        let span = locate(&current, hunk).map_err(|err| prefix_hunk(index, err))?;
        records.push(MatchRecord {
            op: hunk.op,
            start_line: line_of(&current, span.start),
            end_line: line_of(&current, span.end.saturating_sub(1).max(span.start)),
            snippet: current[span.clone()].chars().take(SNIPPET_CHARS).collect(),
        });

        match hunk.op {
            HunkOp::Replace => current.replace_range(span, content),
            HunkOp::InsertBefore => current.insert_str(span.start, content),
            HunkOp::InsertAfter => current.insert_str(span.end, content),
            HunkOp::Delete => current.replace_range(span, ""),
        }
    }
    Ok((current, records))
}

fn prefix_hunk(index: usize, err: ToolError) -> ToolError {
    let hunk = index + 1;
    match err {
        ToolError::NotFound { message } => ToolError::NotFound {
            message: format!("hunk {hunk}: {message}"),
        },
        ToolError::Conflict { message } => ToolError::Conflict {
            message: format!("hunk {hunk}: {message}"),
        },
        ToolError::BadArgs { message } => ToolError::BadArgs {
            message: format!("hunk {hunk}: {message}"),
        },
        other => other,
    }
}

/// Pick the byte span a hunk's anchor refers to.
fn locate(text: &str, hunk: &Hunk) -> Result<Range<usize>, ToolError> {
    let anchor = &hunk.anchor;
    let window = anchor
        .range
        .map_or(0..text.len(), |range| line_window(text, range));
    let spans = find_spans(text, window, anchor)?;

    if spans.is_empty() {
        return Err(ToolError::NotFound {
            message: not_found_message(anchor),
        });
    }

    if hunk.must_unique && !anchor.selects_explicitly() && spans.len() > 1 {
        return Err(ToolError::Conflict {
            message: format!(
                "ambiguous anchor: pattern '{}' matched {} times; add surrounding context, set nth, or use occurrence='last'",
                anchor.pattern,
                spans.len()
            ),
        });
    }

    if let Some(nth) = anchor.nth {
        if nth == 0 {
            return Err(ToolError::bad_args("nth is 1-based"));
        }
        return spans.get(nth as usize - 1).cloned().ok_or_else(|| ToolError::NotFound {
            message: format!(
                "anchor not found: nth={nth} but pattern '{}' matched {} time(s)",
                anchor.pattern,
                spans.len()
            ),
        });
    }

    if anchor.occurrence == Occurrence::Last {
        return Ok(spans[spans.len() - 1].clone());
    }

    Ok(spans[0].clone())
}

fn find_spans(
    text: &str,
    window: Range<usize>,
    anchor: &Anchor,
) -> Result<Vec<Range<usize>>, ToolError> {
    if anchor.pattern.is_empty() {
        return Err(ToolError::bad_args("anchor pattern must not be empty"));
    }
    let offset = window.start;
    let haystack = &text[window];

    let spans = match anchor.kind {
        AnchorKind::Exact => haystack
            .match_indices(anchor.pattern.as_str())
            .map(|(start, m)| offset + start..offset + start + m.len())
            .collect(),
        AnchorKind::Regex => {
            let regex = RegexBuilder::new(&anchor.pattern)
                .multi_line(true)
                .dot_matches_new_line(anchor.dotall)
                .case_insensitive(anchor.ignorecase)
                .build()
                .map_err(|e| ToolError::bad_args(format!("invalid regex '{}': {e}", anchor.pattern)))?;
            regex
                .find_iter(haystack)
                .map(|m| offset + m.start()..offset + m.end())
                .collect()
        }
    };
    Ok(spans)
}

fn not_found_message(anchor: &Anchor) -> String {
    let kind = match anchor.kind {
        AnchorKind::Exact => "exact",
        AnchorKind::Regex => "regex",
    };
    let mut message = format!("anchor not found: {kind} pattern '{}'", anchor.pattern);
    if let Some(range) = anchor.range {
        message.push_str(&format!(" (searched only lines {range})"));
    }
    if anchor.kind == AnchorKind::Regex && anchor.pattern.contains('.') && !anchor.dotall {
        message.push_str(
            "; hint: '.' does not match newlines unless dotall=true",
        );
    }
    message
}

/// Byte window covering lines `range.start()..=range.end()`, clamped to the
/// text.
fn line_window(text: &str, range: LineRange) -> Range<usize> {
    let start = line_start_offset(text, range.start());
    let end = line_start_offset(text, range.end().saturating_add(1));
    start..end.max(start)
}

/// Byte offset where 1-based `line` begins, or `text.len()` past the end.
fn line_start_offset(text: &str, line: u32) -> usize {
    if line <= 1 {
        return 0;
    }
    text.match_indices('\n')
        .nth(line as usize - 2)
        .map_or(text.len(), |(idx, _)| idx + 1)
}

/// 1-based line number containing byte `offset`.
fn line_of(text: &str, offset: usize) -> u32 {
    let clamped = offset.min(text.len());
    text.as_bytes()[..clamped].iter().filter(|&&b| b == b'\n').count() as u32 + 1
}
