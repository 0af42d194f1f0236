//! JSON tool surface end to end.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use rexsh::ConnectionManager;
use rexsh::broadcast::{Broadcaster, OutputSink};
use rexsh::error::SinkError;
use rexsh::tools::{ToolErrorCode, ToolServer};

use common::{Failure, FakeConnector, connect_options};

fn server() -> (ToolServer, Arc<FakeConnector>) {
    let connector = FakeConnector::new();
    let manager = ConnectionManager::with_connector(connector.clone());
    (ToolServer::new(Arc::new(manager), connect_options()), connector)
}

async fn start_shell(server: &ToolServer) -> String {
    let result = server
        .call(
            "start_interactive_session",
            json!({ "command": "", "wait_ms": 2000 }),
        )
        .await
        .unwrap();
    assert_eq!(result["waiting_for_input"], true);
    result["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_execute_command_connects_on_demand() {
    let (server, connector) = server();
    let result = server
        .call(
            "execute_command",
            json!({ "command": "echo ready", "cwd": "/opt", "env": { "MODE": "scan" } }),
        )
        .await
        .unwrap();

    assert_eq!(result["stdout"], "ready\n");
    assert_eq!(result["exit_status"], 0);
    assert_eq!(result["timed_out"], false);
    assert_eq!(connector.connects(), 1);
    assert_eq!(
        connector.transport().commands(),
        vec!["cd '/opt' && export MODE='scan' && echo ready".to_string()]
    );
}

#[tokio::test]
async fn test_execute_command_timeout_is_not_an_error() {
    let (server, _) = server();
    let result = server
        .call(
            "execute_command",
            json!({ "command": "tail -f /var/log/syslog", "timeout_ms": 100 }),
        )
        .await
        .unwrap();
    assert_eq!(result["timed_out"], true);
    assert_eq!(result["stderr"], "Command timed out");
}

#[tokio::test]
async fn test_interactive_flow() {
    let (server, _) = server();
    let id = start_shell(&server).await;

    let result = server
        .call("send_input", json!({ "session_id": id, "input": "echo hi" }))
        .await
        .unwrap();
    assert_eq!(result["new_output"], "echo hi\nhi\nuser@host:~$ ");
    assert_eq!(result["waiting_for_input"], true);

    let result = server
        .call("get_session_output", json!({ "session_id": id }))
        .await
        .unwrap();
    assert_eq!(result["has_new_output"], false);
    assert_eq!(result["new_output"], "");
    assert_eq!(result["waiting_for_input"], true);

    let listed = server.call("list_sessions", Value::Null).await.unwrap();
    let sessions = listed["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], id.as_str());
    assert_eq!(sessions[0]["state"], "waiting_for_input");

    let result = server
        .call("close_session", json!({ "session_id": id }))
        .await
        .unwrap();
    assert!(result["final_stdout"].as_str().unwrap().contains("hi\n"));

    let listed = server.call("list_sessions", json!({})).await.unwrap();
    assert!(listed["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_send_input_without_newline() {
    let (server, _) = server();
    let id = start_shell(&server).await;

    // Half a line produces no output, so the wait runs out.
    let result = server
        .call(
            "send_input",
            json!({ "session_id": id, "input": "echo par", "end_line": false, "wait_ms": 100 }),
        )
        .await
        .unwrap();
    assert_eq!(result["new_output"], "");

    let result = server
        .call("send_input", json!({ "session_id": id, "input": "tial" }))
        .await
        .unwrap();
    assert_eq!(result["new_output"], "echo partial\npartial\nuser@host:~$ ");
}

#[tokio::test]
async fn test_strict_program_hint() {
    let (server, _) = server();
    let result = server
        .call(
            "start_interactive_session",
            json!({ "command": "msfconsole", "program": "msfconsole", "wait_ms": 2000 }),
        )
        .await
        .unwrap();
    assert_eq!(result["waiting_for_input"], true);
    assert!(result["initial_output"].as_str().unwrap().ends_with("msf6 > "));

    let err = server
        .call(
            "start_interactive_session",
            json!({ "command": "nc -lvnp 4444", "program": "netcat" }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ToolErrorCode::InvalidParams);
}

#[tokio::test]
async fn test_unknown_session_is_invalid_params() {
    let (server, _) = server();
    for tool in ["send_input", "get_session_output", "close_session"] {
        let err = server
            .call(tool, json!({ "session_id": "session_1_cafebabe", "input": "x" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ToolErrorCode::InvalidParams, "{tool}");
        assert!(err.message.contains("session_1_cafebabe"));
    }
}

#[tokio::test]
async fn test_bad_arguments_and_unknown_tool() {
    let (server, _) = server();

    let err = server
        .call("execute_command", json!({ "timeout_ms": 5 }))
        .await
        .unwrap_err();
    assert_eq!(err.code, ToolErrorCode::InvalidParams);

    let err = server
        .call("execute_command", json!({ "command": "" }))
        .await
        .unwrap_err();
    assert_eq!(err.code, ToolErrorCode::InvalidParams);

    let err = server.call("reboot", json!({})).await.unwrap_err();
    assert_eq!(err.code, ToolErrorCode::MethodNotFound);
}

#[tokio::test]
async fn test_connection_failure_message() {
    let manager = ConnectionManager::with_connector(FakeConnector::failing(Failure::Refused));
    let server = ToolServer::new(Arc::new(manager), connect_options());

    let err = server
        .call("execute_command", json!({ "command": "id" }))
        .await
        .unwrap_err();
    assert_eq!(err.code, ToolErrorCode::InternalError);
    assert!(err.message.contains("refused on port 2222"));

    // Session tools only look at the registry.
    let listed = server.call("list_sessions", json!({})).await.unwrap();
    assert!(listed["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_sessions_readable_while_connection_is_down() {
    let (server, connector) = server();
    let id = start_shell(&server).await;
    server
        .call("send_input", json!({ "session_id": id, "input": "echo late" }))
        .await
        .unwrap();

    connector.transport().kill();
    *connector.failure.lock().unwrap() = Some(Failure::Refused);

    let result = server
        .call("get_session_output", json!({ "session_id": id }))
        .await
        .unwrap();
    assert_eq!(result["waiting_for_input"], true);

    let listed = server.call("list_sessions", json!({})).await.unwrap();
    assert_eq!(listed["sessions"].as_array().unwrap().len(), 1);

    let result = server
        .call("close_session", json!({ "session_id": id }))
        .await
        .unwrap();
    assert!(result["final_stdout"].as_str().unwrap().contains("late\n"));
    assert_eq!(connector.connects(), 1);
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl OutputSink for Recorder {
    async fn notify_session_start(&self, _: &str, command: &str) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(format!("start {command}"));
        Ok(())
    }

    async fn push_output(&self, _: &str, output: &str, complete: bool) -> Result<(), SinkError> {
        let tag = if complete { "complete" } else { "output" };
        self.events.lock().unwrap().push(format!("{tag} {output:?}"));
        Ok(())
    }

    async fn notify_session_end(&self, _: &str) -> Result<(), SinkError> {
        self.events.lock().unwrap().push("end".to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_viewer_sees_session_lifecycle() {
    let recorder = Arc::new(Recorder::default());
    let manager = ConnectionManager::with_connector(FakeConnector::new())
        .with_broadcaster(Broadcaster::spawn(recorder.clone()));
    let server = ToolServer::new(Arc::new(manager), connect_options());

    let id = start_shell(&server).await;
    server
        .call("close_session", json!({ "session_id": id }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("start "));
    assert!(events.iter().any(|e| e.starts_with("output") && e.contains("Last login")));
    assert_eq!(events.last().map(String::as_str), Some("end"));
    let complete = events.iter().position(|e| e.starts_with("complete")).unwrap();
    assert_eq!(complete, events.len() - 2);
}
