//! JSON tool surface over the connection manager.
//!
//! Each tool takes a JSON object of arguments and returns a JSON object.
//! Tools that open channels first make sure the shared connection is up;
//! tools that only read or close existing sessions never touch it, so they
//! keep working while the connection is down. Failures are
//! reported as [`ToolError`] with a stable code and a message meant for the
//! caller to read.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ConnectionErrorKind, Error};
use crate::manager::{ConnectOptions, ConnectionManager, ExecOptions};
use crate::session::{Session, SessionState};

/// Default wait after starting a session.
pub const DEFAULT_START_WAIT: Duration = Duration::from_secs(3);

/// Default wait after sending input.
pub const DEFAULT_INPUT_WAIT: Duration = Duration::from_secs(3);

/// Upper bound for any caller-supplied wait.
pub const MAX_WAIT: Duration = Duration::from_secs(300);

/// Stable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorCode {
    InvalidParams,
    MethodNotFound,
    InternalError,
}

/// A failed tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub code: ToolErrorCode,
    pub message: String,
}

impl ToolError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: ToolErrorCode::InvalidParams,
            message: message.into(),
        }
    }

    pub fn method_not_found(name: &str) -> Self {
        Self {
            code: ToolErrorCode::MethodNotFound,
            message: format!("Unknown tool: {}", name),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ToolErrorCode::InternalError,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCommandParams {
    pub command: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteCommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionParams {
    #[serde(default)]
    pub command: String,
    /// Profile name or executable, forcing strict classification.
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartSessionResult {
    pub session_id: String,
    pub initial_output: String,
    pub waiting_for_input: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendInputParams {
    pub session_id: String,
    pub input: String,
    #[serde(default = "default_end_line")]
    pub end_line: bool,
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

fn default_end_line() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct SendInputResult {
    pub new_output: String,
    pub waiting_for_input: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionIdParams {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionOutputResult {
    pub new_output: String,
    pub stderr: String,
    pub has_new_output: bool,
    pub waiting_for_input: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseSessionResult {
    pub message: String,
    pub final_stdout: String,
    pub final_stderr: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub command: String,
    pub waiting_for_input: bool,
    pub state: SessionState,
    pub program: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResult {
    pub sessions: Vec<SessionSummary>,
}

/// Description of one tool for discovery, in MCP `tools/list` shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Serves tool calls against one connection manager.
pub struct ToolServer {
    manager: Arc<ConnectionManager>,
    connect_options: ConnectOptions,
}

impl ToolServer {
    /// Serve tools over `manager`, connecting with `connect_options` on demand.
    pub fn new(manager: Arc<ConnectionManager>, connect_options: ConnectOptions) -> Self {
        Self {
            manager,
            connect_options,
        }
    }

    /// The underlying manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Dispatch a call by tool name.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        debug!("tool call: {}", name);
        match name {
            "execute_command" => respond(self.execute_command(parse(arguments)?).await),
            "start_interactive_session" => {
                respond(self.start_interactive_session(parse(arguments)?).await)
            }
            "send_input" => respond(self.send_input(parse(arguments)?).await),
            "get_session_output" => respond(self.get_session_output(parse(arguments)?).await),
            "close_session" => respond(self.close_session(parse(arguments)?).await),
            "list_sessions" => respond(self.list_sessions().await),
            other => Err(ToolError::method_not_found(other)),
        }
    }

    pub async fn execute_command(
        &self,
        params: ExecuteCommandParams,
    ) -> Result<ExecuteCommandResult, ToolError> {
        self.ensure_connected().await?;

        let mut options = ExecOptions {
            timeout: params.timeout_ms.map(Duration::from_millis),
            cwd: params.cwd,
            env: params.env,
        };
        if options.timeout == Some(Duration::ZERO) {
            options.timeout = None;
        }

        let output = self
            .manager
            .execute_command(&params.command, &options)
            .await
            .map_err(|e| self.tool_error(e))?;

        Ok(ExecuteCommandResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status: output.exit_status,
            timed_out: output.timed_out,
        })
    }

    pub async fn start_interactive_session(
        &self,
        params: StartSessionParams,
    ) -> Result<StartSessionResult, ToolError> {
        self.ensure_connected().await?;

        let strategy = self
            .manager
            .strategy_for(&params.command, params.program.as_deref())
            .map_err(|e| self.tool_error(e))?;
        let options = self
            .manager
            .config()
            .session_defaults
            .clone()
            .with_strategy(strategy);

        let session = self
            .manager
            .create_session(&params.command, options)
            .await
            .map_err(|e| self.tool_error(e))?;

        let waiting = self
            .settle(&session, wait_for(params.wait_ms, DEFAULT_START_WAIT))
            .await?;
        let output = session.take_new_output();

        Ok(StartSessionResult {
            session_id: session.id().to_string(),
            initial_output: output.stdout,
            waiting_for_input: waiting,
        })
    }

    pub async fn send_input(&self, params: SendInputParams) -> Result<SendInputResult, ToolError> {
        let session = self.session(&params.session_id)?;

        let mut input = params.input.into_bytes();
        if params.end_line {
            input.push(b'\n');
        }
        let outcome = session
            .write_and_wait(input, wait_for(params.wait_ms, DEFAULT_INPUT_WAIT))
            .await
            .map_err(|e| self.tool_error(e))?;
        let output = session.take_new_output();

        Ok(SendInputResult {
            new_output: output.stdout,
            waiting_for_input: outcome.waiting_for_input(),
        })
    }

    pub async fn get_session_output(
        &self,
        params: SessionIdParams,
    ) -> Result<SessionOutputResult, ToolError> {
        let session = self.session(&params.session_id)?;

        let output = session.take_new_output();
        Ok(SessionOutputResult {
            has_new_output: !output.is_empty(),
            new_output: output.stdout,
            stderr: output.stderr,
            waiting_for_input: session.state().is_waiting(),
        })
    }

    pub async fn close_session(
        &self,
        params: SessionIdParams,
    ) -> Result<CloseSessionResult, ToolError> {
        let session = self.session(&params.session_id)?;

        session.close().await.map_err(|e| self.tool_error(e))?;
        Ok(CloseSessionResult {
            message: format!("Session {} closed", session.id()),
            final_stdout: session.stdout(),
            final_stderr: session.stderr(),
        })
    }

    pub async fn list_sessions(&self) -> Result<ListSessionsResult, ToolError> {
        let sessions = self
            .manager
            .sessions()
            .sessions()
            .into_iter()
            .map(|session| {
                let state = session.state();
                SessionSummary {
                    session_id: session.id().to_string(),
                    command: session.command().to_string(),
                    waiting_for_input: state.is_waiting(),
                    state,
                    program: session.program().map(str::to_string),
                }
            })
            .collect();
        Ok(ListSessionsResult { sessions })
    }

    async fn ensure_connected(&self) -> Result<(), ToolError> {
        self.manager
            .connect(&self.connect_options)
            .await
            .map_err(|e| self.tool_error(e))
    }

    fn session(&self, id: &str) -> Result<Session, ToolError> {
        self.manager.session(id).map_err(|e| self.tool_error(e))
    }

    /// Wait for the session to settle; returns whether it is waiting.
    async fn settle(&self, session: &Session, max_wait: Duration) -> Result<bool, ToolError> {
        let outcome = session
            .wait_until_ready(max_wait)
            .await
            .map_err(|e| self.tool_error(e))?;
        Ok(outcome.waiting_for_input())
    }

    fn tool_error(&self, err: Error) -> ToolError {
        match &err {
            Error::InvalidParams { message } => ToolError::invalid_params(message.clone()),
            Error::Session(e) => ToolError::invalid_params(e.to_string()),
            Error::Configuration { message } => {
                ToolError::internal(format!("Configuration error: {}", message))
            }
            Error::Connection { port, kind, .. } => {
                warn!("connection failed: {}", err);
                ToolError::internal(connection_message(
                    *kind,
                    *port,
                    self.connect_options.username(),
                    &err,
                ))
            }
            Error::Transport(_) | Error::Stream { .. } => ToolError::internal(err.to_string()),
        }
    }

    /// Tool descriptions with JSON schemas.
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "execute_command",
                description: "Run a command on the remote host and return its output once it finishes.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string", "description": "Shell command to run." },
                        "timeout_ms": { "type": "integer", "description": "Time limit in milliseconds (default 30000)." },
                        "cwd": { "type": "string", "description": "Working directory." },
                        "env": { "type": "object", "additionalProperties": { "type": "string" } }
                    },
                    "required": ["command"]
                }),
            },
            ToolDefinition {
                name: "start_interactive_session",
                description: "Start a long-running interactive program (shell, REPL, console) and wait until it asks for input.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string", "description": "Program to start; empty for a login shell." },
                        "program": { "type": "string", "description": "Program profile for strict prompt detection, e.g. msfconsole." },
                        "wait_ms": { "type": "integer", "description": "How long to wait for the first prompt." }
                    },
                    "required": ["command"]
                }),
            },
            ToolDefinition {
                name: "send_input",
                description: "Send input to an interactive session and return the output it produced.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "session_id": { "type": "string" },
                        "input": { "type": "string" },
                        "end_line": { "type": "boolean", "description": "Append a newline (default true)." },
                        "wait_ms": { "type": "integer" }
                    },
                    "required": ["session_id", "input"]
                }),
            },
            ToolDefinition {
                name: "get_session_output",
                description: "Return output produced by a session since the last read.",
                input_schema: json!({
                    "type": "object",
                    "properties": { "session_id": { "type": "string" } },
                    "required": ["session_id"]
                }),
            },
            ToolDefinition {
                name: "close_session",
                description: "Close an interactive session and return its full transcript.",
                input_schema: json!({
                    "type": "object",
                    "properties": { "session_id": { "type": "string" } },
                    "required": ["session_id"]
                }),
            },
            ToolDefinition {
                name: "list_sessions",
                description: "List open interactive sessions.",
                input_schema: json!({ "type": "object", "properties": {} }),
            },
        ]
    }
}

fn connection_message(kind: ConnectionErrorKind, port: u16, user: &str, err: &Error) -> String {
    match kind {
        ConnectionErrorKind::Refused => format!(
            "SSH connection refused on port {}: make sure the SSH service is running (e.g. `sudo service ssh start`)",
            port
        ),
        ConnectionErrorKind::AuthenticationFailed => format!(
            "SSH authentication failed: check the username ({}) and the password or private key",
            user
        ),
        ConnectionErrorKind::TimedOut => {
            "Connection timed out: check that the host is reachable and the port is correct"
                .to_string()
        }
        ConnectionErrorKind::Unknown => format!("Unable to connect: {}", err),
    }
}

fn wait_for(wait_ms: Option<u64>, default: Duration) -> Duration {
    wait_ms
        .map(Duration::from_millis)
        .unwrap_or(default)
        .min(MAX_WAIT)
}

fn parse<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::invalid_params(format!("Invalid arguments: {}", e)))
}

fn respond<T: Serialize>(result: Result<T, ToolError>) -> Result<Value, ToolError> {
    let value = result?;
    serde_json::to_value(value).map_err(|e| ToolError::internal(e.to_string()))
}
