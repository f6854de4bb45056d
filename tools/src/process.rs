//! Shared subprocess management utilities.

use std::time::Duration;

use tokio::process::{Child, Command};

use crate::EnvSanitizer;

/// RAII guard that kills a child process (and its process group on Unix) on drop.
///
/// Wrap a spawned `tokio::process::Child` immediately after `spawn()` to ensure
/// cleanup if the owning future is cancelled. Call `disarm()` after the process
/// exits normally to prevent the kill.
pub struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    pub fn disarm(&mut self) {
        self.child = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        #[cfg(unix)]
        {
            let killed = child
                .id()
                .is_some_and(|pid| signal_process_group(pid, libc::SIGKILL).is_ok());
            if !killed {
                let _ = child.start_kill();
            }
            let _ = child.try_wait();
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
            let _ = child.try_wait();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Signalled,
}

/// Send `signal` to the process group led by `pid`.
///
/// Children are started with [`set_new_session`], so pid == process group id.
#[cfg(unix)]
pub fn signal_process_group(pid: u32, signal: libc::c_int) -> std::io::Result<KillOutcome> {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return Ok(KillOutcome::NotRunning);
    };
    // SAFETY: killpg has no memory-safety preconditions.
    if unsafe { libc::killpg(pgid, signal) } == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(KillOutcome::NotRunning);
        }
        return Err(err);
    }
    Ok(KillOutcome::Signalled)
}

/// SIGTERM the child's process group, wait up to `grace`, then SIGKILL.
///
/// Returns once the child has been reaped or the kill has been issued.
pub async fn terminate_gracefully(child: &mut Child, grace: Duration) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        if let Err(e) = signal_process_group(pid, libc::SIGTERM) {
            tracing::warn!(pid, "SIGTERM to process group failed: {e}");
        }
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        tracing::warn!(pid, grace_ms = grace.as_millis() as u64, "process ignored SIGTERM, killing");
        if let Err(e) = signal_process_group(pid, libc::SIGKILL) {
            tracing::warn!(pid, "SIGKILL to process group failed: {e}");
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Put the child process in its own session (Unix only) so the entire process
/// group can be signalled via `killpg`.
///
/// With `die_with_parent` the child also receives SIGKILL when this process
/// dies (Linux only).
#[cfg(unix)]
pub fn set_new_session(cmd: &mut Command, die_with_parent: bool) {
    // SAFETY: the closure only calls async-signal-safe libc functions.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            #[cfg(target_os = "linux")]
            if die_with_parent && libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            #[cfg(not(target_os = "linux"))]
            let _ = die_with_parent;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn set_new_session(_cmd: &mut Command, _die_with_parent: bool) {}

/// Replace the child's environment with the sanitized parent environment.
pub fn apply_sanitized_env(cmd: &mut Command, sanitizer: &EnvSanitizer) {
    let env: Vec<(String, String)> = std::env::vars().collect();
    cmd.env_clear();
    cmd.envs(sanitizer.sanitize_env(&env));
}

#[cfg(all(test, unix))]
mod tests {
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    use super::{KillOutcome, set_new_session, signal_process_group, terminate_gracefully};
    use tokio::process::Command;

    #[tokio::test]
    async fn terminate_gracefully_stops_sleeping_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30").stdin(Stdio::null());
        set_new_session(&mut cmd, true);
        let mut child = cmd.spawn().unwrap();

        let started = Instant::now();
        terminate_gracefully(&mut child, Duration::from_secs(2)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn signalling_missing_group_reports_not_running() {
        let mut cmd = Command::new("true");
        set_new_session(&mut cmd, false);
        let mut child = cmd.spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();
        assert_eq!(
            signal_process_group(pid, libc::SIGTERM).unwrap(),
            KillOutcome::NotRunning
        );
    }
}
