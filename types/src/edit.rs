//! Edit vocabulary: anchors, hunks, modes and the per-call result.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const fn default_true() -> bool {
    true
}

/// Whole-file or anchor-based editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    Overwrite,
    Append,
    Prepend,
    #[default]
    Patch,
}

impl EditMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Patch => "patch",
        }
    }

    /// Simple modes carry whole-file `content` instead of hunks.
    #[must_use]
    pub const fn is_simple(self) -> bool {
        !matches!(self, Self::Patch)
    }
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    Exact,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occurrence {
    #[default]
    First,
    Last,
}

/// Inclusive, 1-based line window that restricts an anchor search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u32; 2]")]
pub struct LineRange {
    start: u32,
    end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid line range [{start}, {end}]: lines are 1-based and start must be <= end")]
pub struct LineRangeError {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Result<Self, LineRangeError> {
        if start == 0 || start > end {
            return Err(LineRangeError { start, end });
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub const fn start(self) -> u32 {
        self.start
    }

    #[must_use]
    pub const fn end(self) -> u32 {
        self.end
    }
}

impl TryFrom<[u32; 2]> for LineRange {
    type Error = LineRangeError;

    fn try_from(value: [u32; 2]) -> Result<Self, Self::Error> {
        Self::new(value[0], value[1])
    }
}

impl From<LineRange> for [u32; 2] {
    fn from(value: LineRange) -> Self {
        [value.start, value.end]
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Locates the span(s) a hunk acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Anchor {
    #[serde(rename = "type")]
    pub kind: AnchorKind,
    pub pattern: String,
    #[serde(default)]
    pub occurrence: Occurrence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth: Option<u32>,
    #[serde(default)]
    pub dotall: bool,
    #[serde(default)]
    pub ignorecase: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<LineRange>,
}

impl Anchor {
    #[must_use]
    pub fn exact(pattern: impl Into<String>) -> Self {
        Self::with_kind(AnchorKind::Exact, pattern)
    }

    #[must_use]
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::with_kind(AnchorKind::Regex, pattern)
    }

    fn with_kind(kind: AnchorKind, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            occurrence: Occurrence::First,
            nth: None,
            dotall: false,
            ignorecase: false,
            range: None,
        }
    }

    /// True when the caller picked a specific occurrence instead of relying
    /// on the default "first".
    #[must_use]
    pub fn selects_explicitly(&self) -> bool {
        self.nth.is_some() || self.occurrence == Occurrence::Last
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HunkOp {
    Replace,
    InsertBefore,
    InsertAfter,
    Delete,
}

impl HunkOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::InsertBefore => "insert_before",
            Self::InsertAfter => "insert_after",
            Self::Delete => "delete",
        }
    }

    #[must_use]
    pub const fn needs_content(self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl fmt::Display for HunkOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One localized edit.
///
/// `must_unique` defaults to `true`: an implicit "first match" selection on
/// an anchor that matches several spans is rejected as ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hunk {
    pub op: HunkOp,
    pub anchor: Anchor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default = "default_true")]
    pub must_unique: bool,
}

/// Guard against editing a stale version of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Precondition {
    pub file_sha256: String,
}

/// Where one hunk landed, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub op: HunkOp,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: String,
}

/// Outcome of an `edit_file` call. Returned per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditResult {
    pub path: String,
    pub mode: EditMode,
    pub applied: bool,
    pub dry_run: bool,
    pub diff: String,
    pub sha_before: String,
    pub sha_after: String,
    pub additions: u32,
    pub deletions: u32,
    pub matches: Vec<MatchRecord>,
}
