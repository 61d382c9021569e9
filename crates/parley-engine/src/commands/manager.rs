use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use parley_core::ids::CommandId;

use super::buffer::{Decoded, Utf8Carry};
use super::process_group;
use super::session::{CommandSession, CommandSnapshot, CommandStatus};
use crate::error::CommandError;

const READ_CHUNK: usize = 8 * 1024;
/// How long the exit waiter lets readers drain once the process is gone.
/// Background children may hold the pipes open indefinitely.
const READER_DRAIN: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct CommandSessionConfig {
    /// Sessions tracked before finished ones are evicted.
    pub max_sessions: usize,
    pub max_output_bytes: usize,
    pub poll_interval: Duration,
    /// Upper bound for any single wait.
    pub max_wait: Duration,
    pub default_output_chars: usize,
    pub default_grace: Duration,
}

impl Default for CommandSessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 80,
            max_output_bytes: 256 * 1024,
            poll_interval: Duration::from_millis(100),
            max_wait: Duration::from_secs(60),
            default_output_chars: 4000,
            default_grace: Duration::from_millis(600),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CommandRequest {
    pub command: String,
    pub cwd: PathBuf,
    pub name: Option<String>,
    /// Wait this long for the command to finish before returning.
    /// `None` uses the configured default.
    pub grace: Option<Duration>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            name: None,
            grace: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct SendInput {
    pub text: String,
    /// Follow the input with SIGINT to the process group.
    pub terminate: bool,
    /// Run one wait-for-change cycle before snapshotting.
    pub wait: Option<Duration>,
}

/// Long-poll query as received from collaborators.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub command_id: String,
    #[serde(default)]
    pub wait_duration_seconds: Option<f64>,
    #[serde(default)]
    pub output_character_count: Option<i64>,
}

#[derive(Default)]
struct Table {
    next_seq: u64,
    /// Keyed by creation order.
    sessions: BTreeMap<u64, CommandSession>,
}

impl Table {
    fn get(&self, id: &CommandId) -> Option<&CommandSession> {
        self.sessions.values().find(|s| &s.id == id)
    }

    fn get_mut(&mut self, id: &CommandId) -> Option<&mut CommandSession> {
        self.sessions.values_mut().find(|s| &s.id == id)
    }

    fn insert(&mut self, session: CommandSession) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.sessions.insert(seq, session);
    }
}

/// Tracks spawned shell commands and their output.
///
/// Processes run detached from whoever started them; callers observe them
/// through snapshots and long-polls. The table lock is never held across an
/// await point.
pub struct CommandSessionManager {
    config: CommandSessionConfig,
    table: Arc<Mutex<Table>>,
}

impl CommandSessionManager {
    pub fn new(config: CommandSessionConfig) -> Self {
        Self {
            config,
            table: Arc::new(Mutex::new(Table::default())),
        }
    }

    pub fn config(&self) -> &CommandSessionConfig {
        &self.config
    }

    /// Spawn `bash -c <command>` in its own process group.
    #[instrument(skip_all, fields(command = %request.command))]
    pub async fn start(&self, request: CommandRequest) -> Result<CommandSnapshot, CommandError> {
        if request.command.trim().is_empty() {
            return Err(CommandError::BadRequest("command must not be empty".into()));
        }

        let id = CommandId::new();
        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_name(&request.command));
        let mut session = CommandSession::new(
            id.clone(),
            name,
            request.command.clone(),
            request.cwd.clone(),
            self.config.max_output_bytes,
        );

        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        match cmd.spawn() {
            Ok(mut child) => {
                session.pid = child.id();
                session.stdin = child
                    .stdin
                    .take()
                    .map(|stdin| Arc::new(tokio::sync::Mutex::new(stdin)));
                info!(command_id = %id, pid = ?session.pid, "command started");
                self.table.lock().insert(session);

                let mut readers = Vec::with_capacity(2);
                if let Some(stdout) = child.stdout.take() {
                    readers.push(self.spawn_reader(id.clone(), stdout));
                }
                if let Some(stderr) = child.stderr.take() {
                    readers.push(self.spawn_reader(id.clone(), stderr));
                }

                let table = self.table.clone();
                let waiter_id = id.clone();
                tokio::spawn(async move {
                    let exit = child.wait().await;
                    let drain = futures::future::join_all(readers);
                    if tokio::time::timeout(READER_DRAIN, drain).await.is_err() {
                        debug!(command_id = %waiter_id, "output still open after exit");
                    }

                    let mut table = table.lock();
                    let Some(session) = table.get_mut(&waiter_id) else {
                        return;
                    };
                    match exit {
                        Ok(status) => session.finish_with(status),
                        Err(e) => {
                            warn!(command_id = %waiter_id, error = %e, "failed to wait for command");
                            session.output.push(&format!("\nfailed to wait for command: {e}\n"));
                            session.finish(CommandStatus::Failed, None, None);
                        }
                    }
                    debug!(command_id = %waiter_id, status = %session.status, "command finished");
                });
            }
            Err(e) => {
                warn!(command_id = %id, error = %e, "failed to spawn command");
                session.output.push(&format!("failed to start command: {e}\n"));
                session.finish(CommandStatus::Failed, None, None);
                self.table.lock().insert(session);
            }
        }

        self.evict(Some(&id));

        let grace = request
            .grace
            .unwrap_or(self.config.default_grace)
            .min(self.config.max_wait);
        if !grace.is_zero() {
            self.poll_until(&id, grace, |session| !session.status.is_running())
                .await?;
        }
        self.snapshot(&id, None)
    }

    fn spawn_reader<R>(&self, id: CommandId, mut reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let table = self.table.clone();
        tokio::spawn(async move {
            let mut carry = Utf8Carry::new();
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        append_output(&table, &id, &carry.finish());
                        return;
                    }
                    Ok(n) => {
                        if !append_output(&table, &id, &carry.decode(&buf[..n])) {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(command_id = %id, error = %e, "output read failed");
                        append_output(&table, &id, &carry.finish());
                        return;
                    }
                }
            }
        })
    }

    /// Drop the oldest finished sessions while over capacity, sparing `keep`.
    fn evict(&self, keep: Option<&CommandId>) {
        let mut table = self.table.lock();
        while table.sessions.len() > self.config.max_sessions {
            let oldest = table
                .sessions
                .iter()
                .find(|(_, s)| !s.status.is_running() && Some(&s.id) != keep)
                .map(|(seq, _)| *seq);
            let Some(seq) = oldest else {
                break;
            };
            if let Some(evicted) = table.sessions.remove(&seq) {
                debug!(command_id = %evicted.id, "evicted command session");
            }
        }
    }

    fn with_session<R>(
        &self,
        id: &CommandId,
        f: impl FnOnce(&CommandSession) -> R,
    ) -> Result<R, CommandError> {
        let table = self.table.lock();
        table
            .get(id)
            .map(f)
            .ok_or_else(|| CommandError::UnknownId(id.to_string()))
    }

    /// Current state with the last `output_chars` characters of output.
    pub fn snapshot(
        &self,
        id: &CommandId,
        output_chars: Option<usize>,
    ) -> Result<CommandSnapshot, CommandError> {
        let chars = output_chars.unwrap_or(self.config.default_output_chars);
        self.with_session(id, |s| s.snapshot(chars))
    }

    /// Poll until the session leaves running, its output total differs from
    /// `last_seen_total` (the current total when `None`), or `max_wait`
    /// (capped) elapses.
    pub async fn wait_for_change(
        &self,
        id: &CommandId,
        max_wait: Duration,
        last_seen_total: Option<u64>,
    ) -> Result<CommandSnapshot, CommandError> {
        let baseline = match last_seen_total {
            Some(total) => total,
            None => self.with_session(id, |s| s.output.total())?,
        };
        self.poll_until(id, max_wait, |s| {
            !s.status.is_running() || s.output.total() != baseline
        })
        .await?;
        self.snapshot(id, None)
    }

    async fn poll_until(
        &self,
        id: &CommandId,
        max_wait: Duration,
        done: impl Fn(&CommandSession) -> bool,
    ) -> Result<(), CommandError> {
        let deadline = Instant::now() + max_wait.min(self.config.max_wait);
        loop {
            if self.with_session(id, &done)? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// Write to stdin and/or interrupt, then optionally wait for a reaction.
    pub async fn send_input(
        &self,
        id: &CommandId,
        input: SendInput,
    ) -> Result<CommandSnapshot, CommandError> {
        let (running, stdin, pid, baseline) = self.with_session(id, |s| {
            (s.status.is_running(), s.stdin.clone(), s.pid, s.output.total())
        })?;
        if !running {
            return Err(CommandError::BadRequest(format!(
                "command {id} is no longer running"
            )));
        }

        if !input.text.is_empty() {
            let stdin = stdin
                .ok_or_else(|| CommandError::BadRequest(format!("stdin of {id} is closed")))?;
            let mut stdin = stdin.lock().await;
            stdin.write_all(input.text.as_bytes()).await?;
            stdin.flush().await?;
            debug!(command_id = %id, bytes = input.text.len(), "wrote command input");
        }

        if input.terminate {
            if let Some(pid) = pid {
                process_group::interrupt_group(pid)?;
                info!(command_id = %id, pid, "sent SIGINT to command");
            }
        }

        if let Some(wait) = input.wait {
            self.wait_for_change(id, wait, Some(baseline)).await?;
        }
        self.snapshot(id, None)
    }

    /// Most recently started session with this display name or pid.
    pub fn find_by_name_or_pid(
        &self,
        name: Option<&str>,
        pid: Option<u32>,
    ) -> Option<CommandSnapshot> {
        if name.is_none() && pid.is_none() {
            return None;
        }
        let table = self.table.lock();
        table
            .sessions
            .values()
            .rev()
            .find(|s| name.is_some_and(|n| s.name == n) || (pid.is_some() && s.pid == pid))
            .map(|s| s.snapshot(self.config.default_output_chars))
    }

    /// Validate a status query, wait if asked, and snapshot.
    pub async fn status_snapshot(&self, query: StatusQuery) -> Result<CommandSnapshot, CommandError> {
        let id = parse_command_id(&query.command_id)?;

        let wait = match query.wait_duration_seconds {
            None => None,
            Some(secs) if secs.is_finite() && secs >= 0.0 => {
                Some(Duration::from_secs_f64(secs.min(self.config.max_wait.as_secs_f64())))
            }
            Some(secs) => {
                return Err(CommandError::BadRequest(format!(
                    "WaitDurationSeconds must be a non-negative number, got {secs}"
                )))
            }
        };
        let chars = match query.output_character_count {
            None => None,
            Some(n) if n >= 0 => Some(n as usize),
            Some(n) => {
                return Err(CommandError::BadRequest(format!(
                    "OutputCharacterCount must not be negative, got {n}"
                )))
            }
        };

        // Resolve before waiting so an unknown id fails fast.
        self.with_session(&id, |_| ())?;
        if let Some(wait) = wait.filter(|w| !w.is_zero()) {
            self.wait_for_change(&id, wait, None).await?;
        }
        self.snapshot(&id, chars)
    }

    /// All tracked sessions, oldest first.
    pub fn list(&self) -> Vec<CommandSnapshot> {
        let table = self.table.lock();
        table
            .sessions
            .values()
            .map(|s| s.snapshot(self.config.default_output_chars))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn track(&self, session: CommandSession) {
        self.table.lock().insert(session);
        self.evict(None);
    }
}

impl Default for CommandSessionManager {
    fn default() -> Self {
        Self::new(CommandSessionConfig::default())
    }
}

/// Append to a session's buffer. False once the session is gone.
fn append_output(table: &Mutex<Table>, id: &CommandId, decoded: &Decoded) -> bool {
    match table.lock().get_mut(id) {
        Some(session) => {
            session.output.push_decoded(decoded);
            true
        }
        None => false,
    }
}

/// Check that a command id is well formed. Unknown ids are reported later.
pub fn parse_command_id(raw: &str) -> Result<CommandId, CommandError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CommandError::BadRequest("CommandId is required".into()));
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CommandError::BadRequest(format!("malformed CommandId: {raw}")));
    }
    Ok(CommandId::from_raw(raw))
}

/// Display name derived from the command's first word.
fn default_name(command: &str) -> String {
    command
        .split_whitespace()
        .next()
        .map(|word| word.rsplit('/').next().unwrap_or(word))
        .unwrap_or("command")
        .to_string()
}
