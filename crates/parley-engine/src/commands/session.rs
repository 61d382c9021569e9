use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::ChildStdin;

use parley_core::ids::CommandId;

use super::buffer::OutputBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Running,
    /// Exited 0.
    Completed,
    /// Exited nonzero, or never started.
    Failed,
    /// Killed by a signal.
    Terminated,
}

impl CommandStatus {
    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a command session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandSnapshot {
    pub id: CommandId,
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Tail of the retained output.
    pub output: String,
    pub truncated: bool,
    pub total_output_length: u64,
}

pub(crate) type SharedStdin = Arc<tokio::sync::Mutex<ChildStdin>>;

/// One tracked process. Only the manager's table owns these.
pub(crate) struct CommandSession {
    pub id: CommandId,
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
    pub pid: Option<u32>,
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output: OutputBuffer,
    pub stdin: Option<SharedStdin>,
}

impl CommandSession {
    pub fn new(id: CommandId, name: String, command: String, cwd: PathBuf, output_cap: usize) -> Self {
        Self {
            id,
            name,
            command,
            cwd,
            pid: None,
            status: CommandStatus::Running,
            exit_code: None,
            signal: None,
            started_at: Utc::now(),
            ended_at: None,
            output: OutputBuffer::new(output_cap),
            stdin: None,
        }
    }

    /// Move to a terminal state. No-op once the session has left running.
    pub fn finish(&mut self, status: CommandStatus, exit_code: Option<i32>, signal: Option<i32>) {
        if !self.status.is_running() {
            return;
        }
        self.status = status;
        self.exit_code = exit_code;
        self.signal = signal;
        self.ended_at = Some(Utc::now());
        self.stdin = None;
    }

    pub fn finish_with(&mut self, exit: ExitStatus) {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = exit.signal() {
                self.finish(CommandStatus::Terminated, None, Some(signal));
                return;
            }
        }
        match exit.code() {
            Some(0) => self.finish(CommandStatus::Completed, Some(0), None),
            code => self.finish(CommandStatus::Failed, code, None),
        }
    }

    pub fn snapshot(&self, output_chars: usize) -> CommandSnapshot {
        CommandSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            pid: self.pid,
            status: self.status,
            exit_code: self.exit_code,
            signal: self.signal,
            started_at: self.started_at,
            ended_at: self.ended_at,
            output: self.output.tail(output_chars).to_string(),
            truncated: self.output.truncated(),
            total_output_length: self.output.total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CommandSession {
        CommandSession::new(
            CommandId::new(),
            "build".into(),
            "make".into(),
            PathBuf::from("/tmp"),
            1024,
        )
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut s = session();
        s.finish(CommandStatus::Completed, Some(0), None);
        let ended = s.ended_at;
        s.finish(CommandStatus::Failed, Some(1), None);
        assert_eq!(s.status, CommandStatus::Completed);
        assert_eq!(s.exit_code, Some(0));
        assert_eq!(s.ended_at, ended);
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_classification() {
        use std::os::unix::process::ExitStatusExt;

        let mut ok = session();
        ok.finish_with(ExitStatus::from_raw(0));
        assert_eq!(ok.status, CommandStatus::Completed);

        // wait(2) encoding: exit code in the high byte
        let mut failed = session();
        failed.finish_with(ExitStatus::from_raw(3 << 8));
        assert_eq!(failed.status, CommandStatus::Failed);
        assert_eq!(failed.exit_code, Some(3));

        let mut killed = session();
        killed.finish_with(ExitStatus::from_raw(libc::SIGINT));
        assert_eq!(killed.status, CommandStatus::Terminated);
        assert_eq!(killed.signal, Some(libc::SIGINT));
    }

    #[test]
    fn snapshot_reports_tail_and_totals() {
        let mut s = session();
        s.output.push("hello\nworld\n");
        let snap = s.snapshot(6);
        assert_eq!(snap.output, "world\n");
        assert_eq!(snap.total_output_length, 12);
        assert!(!snap.truncated);
        assert_eq!(snap.status, CommandStatus::Running);
        assert_eq!(serde_json::to_value(&snap).unwrap()["status"], "running");
    }
}
