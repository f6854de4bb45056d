//! Unified diff formatting and stats.

use similar::{ChangeTag, TextDiff};

/// Lines of context around each hunk.
const CONTEXT_RADIUS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffStats {
    pub additions: u32,
    pub deletions: u32,
}

/// Format a standard unified diff (`--- a/path`, `+++ b/path`, `@@` hunks).
///
/// Returns an empty string when the texts are identical.
#[must_use]
pub fn unified_diff(path: &str, old_text: &str, new_text: &str) -> String {
    if old_text == new_text {
        return String::new();
    }
    let display = path.trim_start_matches('/');
    let old_header = format!("a/{display}");
    let new_header = format!("b/{display}");

    TextDiff::from_lines(old_text, new_text)
        .unified_diff()
        .context_radius(CONTEXT_RADIUS)
        .header(&old_header, &new_header)
        .to_string()
}

/// Count added and removed lines between old and new content.
#[must_use]
pub fn compute_diff_stats(old_text: &str, new_text: &str) -> DiffStats {
    let diff = TextDiff::from_lines(old_text, new_text);

    let mut stats = DiffStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.additions += 1,
            ChangeTag::Delete => stats.deletions += 1,
            ChangeTag::Equal => {}
        }
    }
    stats
}
