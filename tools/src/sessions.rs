//! Interactive shell sessions.
//!
//! Each session is one shell subprocess in its own process group. Two reader
//! tasks per session forward stdout/stderr lines into a bounded channel that
//! `read` drains. A fixed slot table behind one mutex bounds the number of
//! live sessions; a background reaper evicts idle or over-age sessions.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tricode_types::SessionId;

use crate::config::SessionsConfig;
use crate::process::{ChildGuard, apply_sanitized_env, set_new_session, terminate_gracefully};
use crate::{EnvSanitizer, ToolError, truncate_output};

/// Time source for idle/lifetime bookkeeping.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.base + offset
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_sessions: usize,
    /// Upper bound on bytes returned by one `read`.
    pub output_buffer_bytes: usize,
    pub idle_timeout: Duration,
    pub lifetime: Duration,
    pub reap_interval: Duration,
    /// Wait between SIGTERM and SIGKILL on close.
    pub kill_grace: Duration,
    /// Quiet period that ends a `read` once some output has arrived.
    pub settle: Duration,
    pub channel_capacity: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 3,
            output_buffer_bytes: 4096,
            idle_timeout: Duration::from_secs(30),
            lifetime: Duration::from_secs(300),
            reap_interval: Duration::from_secs(10),
            kill_grace: Duration::from_secs(2),
            settle: Duration::from_millis(100),
            channel_capacity: 1024,
        }
    }
}

impl From<&SessionsConfig> for SessionLimits {
    fn from(cfg: &SessionsConfig) -> Self {
        let d = Self::default();
        Self {
            max_sessions: cfg.max_sessions.unwrap_or(d.max_sessions).max(1),
            output_buffer_bytes: cfg.output_buffer_bytes.unwrap_or(d.output_buffer_bytes),
            idle_timeout: cfg.idle_timeout_secs.map_or(d.idle_timeout, Duration::from_secs),
            lifetime: cfg.lifetime_secs.map_or(d.lifetime, Duration::from_secs),
            reap_interval: cfg
                .reap_interval_secs
                .map_or(d.reap_interval, Duration::from_secs)
                .max(Duration::from_secs(1)),
            kill_grace: cfg.kill_grace_secs.map_or(d.kill_grace, Duration::from_secs),
            settle: cfg.settle_ms.map_or(d.settle, Duration::from_millis),
            channel_capacity: d.channel_capacity,
        }
    }
}

/// Snapshot of one session for `list`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub alive: bool,
    pub age: Duration,
    pub idle: Duration,
    pub shell: String,
    pub initial_command: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputLine {
    stream: Stream,
    text: String,
}

struct SessionIo {
    guard: ChildGuard,
    stdin: Option<ChildStdin>,
}

struct Session {
    id: SessionId,
    shell: String,
    initial_command: Option<String>,
    created_at: Instant,
    last_accessed: Mutex<Instant>,
    io: tokio::sync::Mutex<SessionIo>,
    output: tokio::sync::Mutex<mpsc::Receiver<OutputLine>>,
    readers: Vec<JoinHandle<()>>,
}

impl Session {
    fn touch(&self, now: Instant) {
        *lock(&self.last_accessed) = now;
    }

    fn last_accessed(&self) -> Instant {
        *lock(&self.last_accessed)
    }

    fn is_expired(&self, now: Instant, limits: &SessionLimits) -> bool {
        now.saturating_duration_since(self.last_accessed()) >= limits.idle_timeout
            || now.saturating_duration_since(self.created_at) >= limits.lifetime
    }

    async fn terminate(&self, grace: Duration) {
        let mut io = self.io.lock().await;
        io.stdin = None;
        if let Some(child) = io.guard.child_mut() {
            terminate_gracefully(child, grace).await;
        }
        io.guard.disarm();
        for reader in &self.readers {
            reader.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

struct Inner {
    slots: Mutex<Vec<Option<Arc<Session>>>>,
    limits: SessionLimits,
    clock: Arc<dyn Clock>,
    env_sanitizer: EnvSanitizer,
    work_dir: PathBuf,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn get(&self, id: &SessionId) -> Result<Arc<Session>, ToolError> {
        lock(&self.slots)
            .iter()
            .flatten()
            .find(|s| &s.id == id)
            .cloned()
            .ok_or_else(|| ToolError::NotFound {
                message: format!("Session {id} not found"),
            })
    }

    fn take(&self, id: &SessionId) -> Option<Arc<Session>> {
        lock(&self.slots)
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|s| &s.id == id))
            .and_then(Option::take)
    }

    async fn reap_expired(&self) -> Vec<SessionId> {
        let now = self.clock.now();
        let expired: Vec<Arc<Session>> = {
            let mut slots = lock(&self.slots);
            slots
                .iter_mut()
                .filter(|slot| slot.as_ref().is_some_and(|s| s.is_expired(now, &self.limits)))
                .filter_map(Option::take)
                .collect()
        };

        let mut ids = Vec::with_capacity(expired.len());
        for session in expired {
            tracing::warn!(
                session = %session.id,
                idle_secs = now.saturating_duration_since(session.last_accessed()).as_secs(),
                age_secs = now.saturating_duration_since(session.created_at).as_secs(),
                "reaping expired session"
            );
            session.terminate(self.limits.kill_grace).await;
            ids.push(session.id.clone());
        }
        ids
    }
}

/// Owns every interactive session of one agent context.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("work_dir", &self.inner.work_dir)
            .field("limits", &self.inner.limits)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager and, when called inside a Tokio runtime, start its
    /// reaper task.
    #[must_use]
    pub fn new(
        work_dir: PathBuf,
        limits: SessionLimits,
        env_sanitizer: EnvSanitizer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = Arc::new(Inner {
            slots: Mutex::new((0..limits.max_sessions).map(|_| None).collect()),
            limits,
            clock,
            env_sanitizer,
            work_dir,
            reaper: Mutex::new(None),
        });

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(reaper_loop(Arc::downgrade(&inner), limits.reap_interval));
                *lock(&inner.reaper) = Some(task);
            }
            Err(_) => tracing::warn!("no tokio runtime; session reaper not started"),
        }

        Self { inner }
    }

    #[must_use]
    pub fn limits(&self) -> &SessionLimits {
        &self.inner.limits
    }

    /// Spawn `shell` as a new session, optionally sending `initial_command`.
    pub async fn start(
        &self,
        initial_command: Option<&str>,
        shell: &str,
    ) -> Result<SessionId, ToolError> {
        let session = {
            let mut slots = lock(&self.inner.slots);
            let Some(free) = slots.iter().position(Option::is_none) else {
                return Err(ToolError::ResourceExhausted {
                    message: format!(
                        "maximum of {} concurrent sessions reached; close one first",
                        self.inner.limits.max_sessions
                    ),
                });
            };
            let id = unique_id(&slots);
            let session = Arc::new(self.spawn(id, initial_command, shell)?);
            slots[free] = Some(Arc::clone(&session));
            session
        };

        tracing::info!(
            session = %session.id,
            shell,
            command = initial_command.unwrap_or(""),
            "session started"
        );

        if let Some(command) = initial_command.filter(|c| !c.trim().is_empty())
            && let Err(err) = write_line(&session, command).await
        {
            tracing::warn!(session = %session.id, error = %err, "initial command failed; closing session");
            if let Some(session) = self.inner.take(&session.id) {
                session.terminate(self.inner.limits.kill_grace).await;
            }
            return Err(err);
        }
        Ok(session.id.clone())
    }

    fn spawn(
        &self,
        id: SessionId,
        initial_command: Option<&str>,
        shell: &str,
    ) -> Result<Session, ToolError> {
        let mut command = Command::new(shell);
        command
            .current_dir(&self.inner.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        apply_sanitized_env(&mut command, &self.inner.env_sanitizer);
        set_new_session(&mut command, false);

        let mut child = command.spawn().map_err(|e| {
            ToolError::failed("start_session", format!("failed to spawn {shell}: {e}"))
        })?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let guard = ChildGuard::new(child);

        let (tx, rx) = mpsc::channel(self.inner.limits.channel_capacity);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            readers.push(tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone())));
        }
        if let Some(stderr) = stderr {
            readers.push(tokio::spawn(forward_lines(stderr, Stream::Stderr, tx)));
        }

        let now = self.inner.clock.now();
        Ok(Session {
            id,
            shell: shell.to_string(),
            initial_command: initial_command.map(str::to_string),
            created_at: now,
            last_accessed: Mutex::new(now),
            io: tokio::sync::Mutex::new(SessionIo { guard, stdin }),
            output: tokio::sync::Mutex::new(rx),
            readers,
        })
    }

    /// Write `text` plus a newline to the session's stdin.
    pub async fn send(&self, id: &SessionId, text: &str) -> Result<(), ToolError> {
        let session = self.inner.get(id)?;
        write_line(&session, text).await?;
        session.touch(self.inner.clock.now());
        Ok(())
    }

    /// Drain queued output for up to `timeout`.
    ///
    /// Returns early once at least one line has arrived and the queue stays
    /// empty for the settle window.
    pub async fn read(&self, id: &SessionId, timeout: Duration) -> Result<String, ToolError> {
        let session = self.inner.get(id)?;
        let limits = &self.inner.limits;

        let mut lines: Vec<String> = Vec::new();
        let mut bytes = 0usize;
        {
            let mut rx = session.output.lock().await;
            let deadline = tokio::time::Instant::now() + timeout;
            while bytes <= limits.output_buffer_bytes {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let wait = if lines.is_empty() {
                    remaining
                } else {
                    remaining.min(limits.settle)
                };
                match tokio::time::timeout(wait, rx.recv()).await {
                    Ok(Some(line)) => {
                        let rendered = match line.stream {
                            Stream::Stdout => line.text,
                            Stream::Stderr => format!("[stderr] {}", line.text),
                        };
                        bytes += rendered.len() + 1;
                        lines.push(rendered);
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        }
        session.touch(self.inner.clock.now());

        if lines.is_empty() {
            return Ok(format!("(no output within {}s)", timeout.as_secs_f64()));
        }
        Ok(truncate_output(lines.join("\n"), limits.output_buffer_bytes))
    }

    /// Terminate the session's process group and free its slot.
    pub async fn close(&self, id: &SessionId) -> Result<(), ToolError> {
        let session = self.inner.take(id).ok_or_else(|| ToolError::NotFound {
            message: format!("Session {id} not found"),
        })?;
        session.terminate(self.inner.limits.kill_grace).await;
        tracing::info!(session = %id, "session closed");
        Ok(())
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = lock(&self.inner.slots).iter().flatten().cloned().collect();
        let now = self.inner.clock.now();

        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            let alive = {
                let mut io = session.io.lock().await;
                io.guard
                    .child_mut()
                    .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
            };
            infos.push(SessionInfo {
                id: session.id.clone(),
                alive,
                age: now.saturating_duration_since(session.created_at),
                idle: now.saturating_duration_since(session.last_accessed()),
                shell: session.shell.clone(),
                initial_command: session.initial_command.clone(),
            });
        }
        infos
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        lock(&self.inner.slots).iter().flatten().count()
    }

    /// Evict idle or over-age sessions now. The reaper task calls this
    /// periodically.
    pub async fn reap_expired(&self) -> Vec<SessionId> {
        self.inner.reap_expired().await
    }

    /// Stop the reaper and close every session.
    pub async fn shutdown(&self) {
        if let Some(task) = lock(&self.inner.reaper).take() {
            task.abort();
        }
        let sessions: Vec<Arc<Session>> = lock(&self.inner.slots)
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for session in sessions {
            session.terminate(self.inner.limits.kill_grace).await;
            tracing::info!(session = %session.id, "session closed at shutdown");
        }
    }
}

async fn reaper_loop(inner: Weak<Inner>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let reaped = inner.reap_expired().await;
        if !reaped.is_empty() {
            tracing::debug!(count = reaped.len(), "reaper evicted sessions");
        }
    }
}

fn unique_id(slots: &[Option<Arc<Session>>]) -> SessionId {
    loop {
        let token = uuid::Uuid::new_v4().simple().to_string();
        if let Ok(id) = SessionId::from_token(&token)
            && !slots.iter().flatten().any(|s| s.id == id)
        {
            return id;
        }
    }
}

async fn write_line(session: &Session, text: &str) -> Result<(), ToolError> {
    let mut io = session.io.lock().await;
    let exited = match io.guard.child_mut() {
        Some(child) => child.try_wait().ok().flatten(),
        None => None,
    };
    if let Some(status) = exited {
        return Err(ToolError::Conflict {
            message: format!("Session {} has exited ({status})", session.id),
        });
    }
    let Some(stdin) = io.stdin.as_mut() else {
        return Err(ToolError::Conflict {
            message: format!("Session {} has no open stdin", session.id),
        });
    };

    let mut payload = String::with_capacity(text.len() + 1);
    payload.push_str(text);
    payload.push('\n');
    let write = async {
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await
    };
    write.await.map_err(|e| ToolError::Conflict {
        message: format!("Session {} is not accepting input: {e}", session.id),
    })
}

async fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let text = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(OutputLine { stream, text }).await.is_err() {
                    break;
                }
            }
        }
    }
}
