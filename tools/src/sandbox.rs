//! Path sandbox: confines filesystem tools to the working root.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use super::{DenialReason, ToolError};

/// Default deny patterns for credential stores and key material.
pub const DEFAULT_SANDBOX_DENY_PATTERNS: &[&str] = &[
    "**/.ssh",
    "**/.ssh/**",
    "**/.gnupg",
    "**/.gnupg/**",
    "**/.aws",
    "**/.aws/**",
    "**/.git-credentials",
    "**/.netrc",
    "**/id_rsa*",
    "**/id_ed25519*",
    "**/*.pem",
    "**/*.key",
];

#[must_use]
pub fn default_sandbox_deny_patterns() -> Vec<String> {
    DEFAULT_SANDBOX_DENY_PATTERNS
        .iter()
        .map(std::string::ToString::to_string)
        .collect()
}

#[derive(Debug, Clone)]
struct DenyPattern {
    pattern: String,
    matcher: globset::GlobMatcher,
}

/// Resolves tool-supplied paths and keeps them inside the work root.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
    deny_patterns: Vec<DenyPattern>,
    bypass: bool,
}

impl PathSandbox {
    /// `root` is canonicalized once here; it must exist.
    pub fn new(
        root: impl AsRef<Path>,
        denied_patterns: &[String],
        bypass: bool,
    ) -> Result<Self, ToolError> {
        let root = root.as_ref();
        let canonical = std::fs::canonicalize(root).map_err(|e| ToolError::BadArgs {
            message: format!("working directory {} is not usable: {e}", root.display()),
        })?;
        if !canonical.is_dir() {
            return Err(ToolError::BadArgs {
                message: format!("working directory {} is not a directory", root.display()),
            });
        }

        let mut deny_patterns = Vec::new();
        for pat in denied_patterns {
            let mut builder = globset::GlobBuilder::new(pat);
            // "Secret.PEM" must not slip past "*.pem".
            builder.case_insensitive(true);
            let glob = builder.build().map_err(|e| ToolError::BadArgs {
                message: format!("Invalid denied pattern '{pat}': {e}"),
            })?;
            deny_patterns.push(DenyPattern {
                pattern: pat.clone(),
                matcher: glob.compile_matcher(),
            });
        }

        Ok(Self {
            root: canonical,
            deny_patterns,
            bypass,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn bypass(&self) -> bool {
        self.bypass
    }

    /// Turn a caller-supplied path into an absolute, symlink-resolved path.
    ///
    /// Missing trailing components are re-appended to the canonical form of
    /// the nearest existing ancestor.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::bad_args("path must not be empty"));
        }
        if contains_unsafe_path_chars(path) {
            return Err(ToolError::bad_args(
                "path contains invalid control characters",
            ));
        }

        let expanded = expand_home(path);
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            self.root.join(expanded)
        };
        canonicalize_lenient(&joined)
    }

    /// Check an already resolved path against the root and the deny list.
    pub fn validate(&self, path: &Path) -> Result<(), ToolError> {
        if !self.bypass && !path.starts_with(&self.root) {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideSandbox {
                    attempted: path.to_path_buf(),
                    resolved: path.to_path_buf(),
                },
            ));
        }
        if let Some(pattern) = self.matches_denied_pattern(path) {
            return Err(ToolError::SandboxViolation(
                DenialReason::DeniedPatternMatched {
                    attempted: path.to_path_buf(),
                    pattern,
                },
            ));
        }
        Ok(())
    }

    pub fn resolve_and_validate(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.resolve(path)?;
        if let Err(err) = self.validate(&resolved) {
            tracing::warn!(attempted = path, resolved = %resolved.display(), "sandbox denied path");
            return Err(err);
        }
        Ok(resolved)
    }

    #[must_use]
    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }

    /// Path relative to the root for messages, or the full path when it is
    /// outside.
    #[must_use]
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }

    fn matches_denied_pattern(&self, path: &Path) -> Option<String> {
        let normalized = path.to_string_lossy().replace('\\', "/");
        self.deny_patterns
            .iter()
            .find(|pat| pat.matcher.is_match(&normalized))
            .map(|pat| pat.pattern.clone())
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Canonicalize `path`, tolerating a missing tail.
///
/// Walks up to the nearest existing ancestor, canonicalizes it, then re-joins
/// the missing components. `..` inside the missing tail cannot be resolved
/// against the real filesystem and is refused.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, ToolError> {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Ok(canonical);
    }

    let mut existing = path;
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        let Some(parent) = existing.parent() else {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideSandbox {
                    attempted: path.to_path_buf(),
                    resolved: path.to_path_buf(),
                },
            ));
        };
        match existing.components().next_back() {
            Some(Component::Normal(name)) => tail.push(name.to_os_string()),
            Some(Component::CurDir) => {}
            _ => {
                return Err(ToolError::SandboxViolation(
                    DenialReason::UnresolvableTraversal {
                        attempted: path.to_path_buf(),
                    },
                ));
            }
        }
        existing = parent;
    }

    let mut result = std::fs::canonicalize(existing).map_err(|_| {
        ToolError::SandboxViolation(DenialReason::PathOutsideSandbox {
            attempted: path.to_path_buf(),
            resolved: existing.to_path_buf(),
        })
    })?;
    for part in tail.into_iter().rev() {
        result.push(part);
    }
    Ok(result)
}

fn contains_unsafe_path_chars(input: &str) -> bool {
    input.chars().any(is_unsafe_path_char)
}

/// C0/C1 control characters, DEL, and the invisible bidi/zero-width marks.
fn is_unsafe_path_char(c: char) -> bool {
    matches!(
        c,
        '\u{0000}'..='\u{001f}'
            | '\u{007f}'
            | '\u{0080}'..='\u{009f}'
            | '\u{200b}'..='\u{200f}'
            | '\u{202a}'..='\u{202e}'
            | '\u{2066}'..='\u{2069}'
            | '\u{feff}'
    )
}
