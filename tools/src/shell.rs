//! Shell detection and configuration for command execution.

use std::path::{Path, PathBuf};

use crate::config::ShellConfig;

/// Shell used by `start_session` when neither the caller nor config names one.
pub const DEFAULT_SESSION_SHELL: &str = "/bin/bash";

/// Detected shell for command execution.
#[derive(Debug, Clone)]
pub struct DetectedShell {
    /// Path or name of the shell binary.
    pub binary: PathBuf,
    /// Arguments to pass before the command (e.g., `["-c"]`).
    pub args: Vec<String>,
    /// Human-readable name for logging.
    pub name: String,
}

impl std::fmt::Display for DetectedShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl DetectedShell {
    /// Build the argv for running `command` once through this shell.
    #[must_use]
    pub fn command_args<'a>(&'a self, command: &'a str) -> Vec<&'a str> {
        let mut args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        args.push(command);
        args
    }
}

/// Detect the best available shell based on config and platform.
///
/// Priority:
/// - Config override (if set)
/// - `$SHELL`, then `bash` on `PATH`, then `/bin/sh`
#[must_use]
pub fn detect_shell(config: Option<&ShellConfig>) -> DetectedShell {
    if let Some(cfg) = config
        && let Some(binary) = &cfg.binary
    {
        let args = cfg.args.clone().unwrap_or_else(|| default_args_for(binary));
        return DetectedShell {
            binary: PathBuf::from(binary),
            args,
            name: "configured".into(),
        };
    }

    detect_platform_shell()
}

/// Shell binary for interactive sessions: explicit request, then config, then
/// [`DEFAULT_SESSION_SHELL`].
#[must_use]
pub fn session_shell(requested: Option<&str>, config: Option<&ShellConfig>) -> String {
    requested
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| config.and_then(|c| c.session_shell.clone()))
        .unwrap_or_else(|| DEFAULT_SESSION_SHELL.to_string())
}

/// Infer default args for a shell binary name.
fn default_args_for(binary: &str) -> Vec<String> {
    let name = Path::new(binary)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(binary)
        .to_lowercase();

    match name.as_str() {
        "pwsh" | "powershell" => vec!["-NoProfile".to_string(), "-Command".to_string()],
        // Most Unix shells use -c
        _ => vec!["-c".to_string()],
    }
}

fn detect_platform_shell() -> DetectedShell {
    // Try $SHELL first (user's preferred shell)
    if let Ok(shell) = std::env::var("SHELL") {
        let path = Path::new(&shell);
        if path.exists() {
            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("user-shell")
                .to_string();
            return DetectedShell {
                binary: PathBuf::from(&shell),
                args: vec!["-c".to_string()],
                name,
            };
        }
    }

    if let Ok(path) = which::which("bash") {
        return DetectedShell {
            binary: path,
            args: vec!["-c".to_string()],
            name: "bash".into(),
        };
    }

    DetectedShell {
        binary: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string()],
        name: "sh".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_SESSION_SHELL, PathBuf, ShellConfig, default_args_for, detect_shell, session_shell};

    #[test]
    fn default_args_for_unix_shells() {
        assert_eq!(default_args_for("sh"), vec!["-c"]);
        assert_eq!(default_args_for("/bin/bash"), vec!["-c"]);
        assert_eq!(default_args_for("/usr/local/bin/fish"), vec!["-c"]);
        assert_eq!(default_args_for("pwsh"), vec!["-NoProfile", "-Command"]);
    }

    #[test]
    fn config_override_infers_args() {
        let config = ShellConfig {
            binary: Some("zsh".to_string()),
            ..ShellConfig::default()
        };
        let shell = detect_shell(Some(&config));
        assert_eq!(shell.binary, PathBuf::from("zsh"));
        assert_eq!(shell.args, vec!["-c"]);
        assert_eq!(shell.name, "configured");
        assert_eq!(shell.command_args("ls"), vec!["-c", "ls"]);
    }

    #[test]
    fn detect_shell_without_config_finds_something() {
        let shell = detect_shell(None);
        assert!(!shell.binary.as_os_str().is_empty());
        assert!(!shell.args.is_empty());
    }

    #[test]
    fn session_shell_precedence() {
        let config = ShellConfig {
            session_shell: Some("/bin/zsh".into()),
            ..ShellConfig::default()
        };
        assert_eq!(session_shell(Some("/bin/sh"), Some(&config)), "/bin/sh");
        assert_eq!(session_shell(Some("  "), Some(&config)), "/bin/zsh");
        assert_eq!(session_shell(None, None), DEFAULT_SESSION_SHELL);
    }
}
