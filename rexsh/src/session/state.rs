//! Observable session state.

use std::time::Duration;

use serde::Serialize;

/// Wait state of an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// The process is running and not (yet) asking for input.
    Running,

    /// The process appears blocked waiting for input.
    WaitingForInput,

    /// The channel has closed. Terminal.
    Closed,
}

impl SessionState {
    /// Whether the process appears blocked waiting for input.
    pub fn is_waiting(&self) -> bool {
        matches!(self, SessionState::WaitingForInput)
    }

    /// Whether the session has closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Running => "running",
            SessionState::WaitingForInput => "waiting_for_input",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Why a `wait_until_ready` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitReason {
    /// The session is waiting for input.
    Ready,

    /// The session closed.
    Closed,

    /// The deadline passed first; the state is best effort.
    Deadline,
}

/// Result of waiting for a session to become ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitOutcome {
    /// Session state when the wait settled.
    pub state: SessionState,

    /// What settled the wait.
    pub reason: WaitReason,
}

impl WaitOutcome {
    /// Whether the session was waiting for input when the wait settled.
    pub fn waiting_for_input(&self) -> bool {
        self.state.is_waiting()
    }
}

/// Which stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One sanitized chunk of session output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputEvent {
    pub stream: OutputStream,
    pub text: String,
}

/// Output appended since a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewOutput {
    pub stdout: String,
    pub stderr: String,
}

impl NewOutput {
    /// Whether nothing new arrived on either stream.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Byte offsets into a session's stdout and stderr transcripts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputCursor {
    pub stdout: usize,
    pub stderr: usize,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub command: String,
    pub state: SessionState,
    /// Strict-mode target program, if any.
    pub program: Option<String>,
    /// Name of the prompt rule behind the current verdict.
    pub prompt_rule: Option<String>,
    pub stdout_len: usize,
    pub stderr_len: usize,
    pub exit_status: Option<u32>,
    pub error: Option<String>,
    #[serde(with = "millis")]
    pub quiet_for: Duration,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
