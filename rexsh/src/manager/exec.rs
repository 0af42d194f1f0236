//! One-shot command execution.

use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;

use crate::channel::Sanitizer;
use crate::error::{Error, Result, TransportError};
use crate::transport::{ByteStream, StreamEvent};

/// Default time limit of a one-shot command.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Stdout reported for a command that hit its time limit.
pub const TIMEOUT_STDOUT: &str = "Command execution exceeded the time limit and was interrupted";

/// Stderr reported for a command that hit its time limit.
pub const TIMEOUT_STDERR: &str = "Command timed out";

/// Options for [`ConnectionManager::execute_command`](super::ConnectionManager::execute_command).
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Time limit for the whole command. `None` uses the manager default.
    pub timeout: Option<Duration>,

    /// Remote working directory.
    pub cwd: Option<String>,

    /// Environment variables exported before the command, in order.
    pub env: IndexMap<String, String>,
}

impl ExecOptions {
    /// Set the time limit.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Captured result of a one-shot command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    /// Sanitized stdout.
    pub stdout: String,

    /// Sanitized stderr.
    pub stderr: String,

    /// Remote exit status, when the server reported one.
    pub exit_status: Option<u32>,

    /// Whether the time limit interrupted the command.
    pub timed_out: bool,
}

impl ExecOutput {
    /// The result reported for a command that hit its time limit.
    pub fn timed_out() -> Self {
        Self {
            stdout: TIMEOUT_STDOUT.to_string(),
            stderr: TIMEOUT_STDERR.to_string(),
            exit_status: None,
            timed_out: true,
        }
    }

    /// Whether the command finished with status 0.
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_status == Some(0)
    }
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Prefix `command` with the working directory change and exports.
pub(crate) fn build_remote_command(command: &str, options: &ExecOptions) -> Result<String> {
    if command.trim().is_empty() {
        return Err(Error::invalid_params("command must not be empty"));
    }

    let mut parts = Vec::with_capacity(options.env.len() + 2);
    if let Some(cwd) = options.cwd.as_deref().filter(|c| !c.is_empty()) {
        parts.push(format!("cd {}", shell_quote(cwd)));
    }
    for (key, value) in &options.env {
        if !is_valid_env_key(key) {
            return Err(Error::invalid_params(format!(
                "invalid environment variable name '{}'",
                key
            )));
        }
        parts.push(format!("export {}={}", key, shell_quote(value)));
    }
    parts.push(command.to_string());
    Ok(parts.join(" && "))
}

/// Read a channel to completion, sanitizing both streams.
///
/// A channel that fails before closing yields [`TransportError::Channel`].
pub(crate) async fn collect(stream: &mut dyn ByteStream) -> Result<ExecOutput> {
    let mut stdout = Sanitizer::new();
    let mut stderr = Sanitizer::new();
    let mut output = ExecOutput::default();

    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::Data(data) => output.stdout.push_str(&stdout.sanitize(&data)),
            StreamEvent::ExtendedData(data) => output.stderr.push_str(&stderr.sanitize(&data)),
            StreamEvent::ExitStatus(code) => output.exit_status = Some(code),
            StreamEvent::Eof => {}
            StreamEvent::Closed => break,
            StreamEvent::Error(message) => return Err(TransportError::Channel(message).into()),
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_command_untouched() {
        let remote = build_remote_command("uname -a", &ExecOptions::default()).unwrap();
        assert_eq!(remote, "uname -a");
    }

    #[test]
    fn test_cwd_and_env_prefix() {
        let options = ExecOptions::default()
            .cwd("/opt/tools dir")
            .env("TARGET", "10.0.0.5")
            .env("NOTE", "it's here");
        let remote = build_remote_command("nmap $TARGET", &options).unwrap();
        assert_eq!(
            remote,
            "cd '/opt/tools dir' && export TARGET='10.0.0.5' && export NOTE='it'\\''s here' && nmap $TARGET"
        );
    }

    #[test]
    fn test_invalid_env_key_rejected() {
        for key in ["", "1ABC", "A-B", "A B", "X;rm"] {
            let options = ExecOptions::default().env(key, "v");
            assert!(
                matches!(
                    build_remote_command("true", &options),
                    Err(Error::InvalidParams { .. })
                ),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(build_remote_command("  ", &ExecOptions::default()).is_err());
    }

    #[test]
    fn test_timed_out_sentinel() {
        let output = ExecOutput::timed_out();
        assert!(output.timed_out);
        assert_eq!(output.stdout, TIMEOUT_STDOUT);
        assert_eq!(output.stderr, TIMEOUT_STDERR);
        assert!(!output.is_success());
    }
}
