//! Interactive session behavior against an in-memory shell.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rexsh::profile::ProgramProfile;
use rexsh::session::OutputStream;
use rexsh::{ClassifierStrategy, Error, SessionState, WaitReason};

use common::{connected_manager, fast_options, init_logging};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_shell_echo_round_trip() {
    init_logging();
    let (manager, _) = connected_manager().await;

    let shell = manager.create_session("", fast_options()).await.unwrap();
    let outcome = shell.wait_until_ready(WAIT).await.unwrap();
    assert_eq!(outcome.reason, WaitReason::Ready);
    assert_eq!(shell.state(), SessionState::WaitingForInput);

    let banner = shell.take_new_output();
    assert!(banner.stdout.contains("Last login"));
    assert!(banner.stdout.ends_with("user@host:~$ "));
    assert!(!banner.stdout.contains('\x1b'));
    assert!(!banner.stdout.contains('\r'));

    let outcome = shell.write_and_wait("echo hi\n", WAIT).await.unwrap();
    assert!(outcome.waiting_for_input());
    let new = shell.take_new_output();
    assert_eq!(new.stdout, "echo hi\nhi\nuser@host:~$ ");
    assert!(new.stderr.is_empty());
}

#[tokio::test]
async fn test_transcript_is_concatenation_of_reads() {
    let (manager, _) = connected_manager().await;
    let shell = manager.create_session("", fast_options()).await.unwrap();
    shell.wait_until_ready(WAIT).await.unwrap();

    let mut reads = shell.take_new_output().stdout;
    for line in ["echo one", "whoami", "echo two"] {
        shell.write_and_wait(format!("{}\n", line), WAIT).await.unwrap();
        reads.push_str(&shell.take_new_output().stdout);
    }
    assert_eq!(reads, shell.stdout());
    assert!(reads.contains("bash: whoami: command not found"));
    assert!(shell.take_new_output().is_empty());
}

#[tokio::test]
async fn test_output_cursor_is_independent_of_read_cursor() {
    let (manager, _) = connected_manager().await;
    let shell = manager.create_session("", fast_options()).await.unwrap();
    shell.wait_until_ready(WAIT).await.unwrap();

    let (first, cursor) = shell.output_since(Default::default());
    shell.take_new_output();
    shell.write_and_wait("echo again\n", WAIT).await.unwrap();

    let (rest, _) = shell.output_since(cursor);
    assert_eq!(format!("{}{}", first.stdout, rest.stdout), shell.stdout());
    assert!(rest.stdout.starts_with("echo again\n"));
}

#[tokio::test]
async fn test_wait_returns_at_deadline_while_running() {
    let (manager, _) = connected_manager().await;
    let shell = manager.create_session("", fast_options()).await.unwrap();
    shell.wait_until_ready(WAIT).await.unwrap();

    // `cat` reads stdin and never prints a prompt.
    let started = tokio::time::Instant::now();
    let outcome = shell
        .write_and_wait("cat\n", Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(outcome.reason, WaitReason::Deadline);
    assert_eq!(outcome.state, SessionState::Running);
    assert!(started.elapsed() < Duration::from_secs(1));

    // A fresh wait after the deadline still works.
    let outcome = shell.wait_until_ready(Duration::from_millis(50)).await.unwrap();
    assert_eq!(outcome.reason, WaitReason::Deadline);
}

#[tokio::test]
async fn test_concurrent_waits_resolve_together() {
    let (manager, _) = connected_manager().await;
    let shell = manager.create_session("", fast_options()).await.unwrap();
    shell.wait_until_ready(WAIT).await.unwrap();
    shell.write_and_wait("sleep 100\n", Duration::from_millis(100)).await.unwrap();
    assert_eq!(shell.state(), SessionState::Running);

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let shell = shell.clone();
            tokio::spawn(async move { shell.wait_until_ready(WAIT).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The fake shell answers a bare newline with a fresh prompt.
    shell.write("\n").await.unwrap();
    for waiter in waiters {
        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.reason, WaitReason::Ready);
    }
}

#[tokio::test]
async fn test_exit_closes_and_deregisters() {
    let (manager, _) = connected_manager().await;
    let shell = manager.create_session("", fast_options()).await.unwrap();
    let id = shell.id().to_string();
    shell.wait_until_ready(WAIT).await.unwrap();
    assert!(manager.sessions().get(&id).is_some());

    let outcome = shell.write_and_wait("exit\n", WAIT).await.unwrap();
    assert_eq!(outcome.reason, WaitReason::Closed);
    assert_eq!(outcome.state, SessionState::Closed);
    assert!(manager.sessions().get(&id).is_none());
    assert_eq!(shell.exit_status(), Some(0));
    assert!(shell.stdout().ends_with("logout\n"));

    let err = shell.send_line("echo late").await.unwrap_err();
    assert!(matches!(err, Error::Session(_)));
}

#[tokio::test]
async fn test_close_returns_final_transcript() {
    let (manager, _) = connected_manager().await;
    let shell = manager.create_session("", fast_options()).await.unwrap();
    shell.wait_until_ready(WAIT).await.unwrap();
    shell.write_and_wait("echo bye\n", WAIT).await.unwrap();

    let snapshot = manager.close_session(shell.id()).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Closed);
    assert_eq!(snapshot.stdout_len, shell.stdout().len());
    assert!(shell.stdout().contains("bye\n"));
    assert!(manager.sessions().is_empty());

    // Closing twice is harmless.
    let again = shell.close().await.unwrap();
    assert_eq!(again.state, SessionState::Closed);
}

#[tokio::test]
async fn test_write_failure_surfaces_as_stream_error() {
    let (manager, _) = connected_manager().await;
    let session = manager.create_session("broken", fast_options()).await.unwrap();

    let err = session.send_line("anything").await.unwrap_err();
    assert!(matches!(err, Error::Stream { .. }));

    let mut state = session.subscribe_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| s.is_closed()))
        .await
        .unwrap()
        .unwrap();
    assert!(session.snapshot().error.is_some());
    assert!(manager.sessions().get(session.id()).is_none());
}

#[tokio::test]
async fn test_strict_mode_ignores_banner_hash() {
    let (manager, _) = connected_manager().await;

    let msf = manager.create_session("msfconsole", fast_options()).await.unwrap();
    assert_eq!(msf.program(), Some("msfconsole"));

    // The banner ends in a lone `#` that a generic rule would accept.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(msf.state(), SessionState::Running);

    let outcome = msf.wait_until_ready(WAIT).await.unwrap();
    assert_eq!(outcome.reason, WaitReason::Ready);
    assert!(msf.stdout().ends_with("msf6 > "));
    assert_eq!(msf.snapshot().prompt_rule.as_deref(), Some("msf-console"));

    let outcome = msf.write_and_wait("version\n", WAIT).await.unwrap();
    assert!(outcome.waiting_for_input());
    assert!(msf.stdout().contains("Framework: 6.3.4-dev"));
}

#[tokio::test]
async fn test_generic_mode_is_fooled_by_banner_hash() {
    let (manager, _) = connected_manager().await;
    let options = fast_options().with_strategy(ClassifierStrategy::generic());

    let msf = manager.create_session("msfconsole", options).await.unwrap();
    assert_eq!(msf.program(), None);

    let outcome = msf.wait_until_ready(Duration::from_millis(100)).await.unwrap();
    assert_eq!(outcome.reason, WaitReason::Ready);
    assert!(msf.stdout().contains("sessions -1\n#\n"));
}

#[tokio::test]
async fn test_strict_stall_fallback() {
    let (manager, _) = connected_manager().await;
    let profile = ProgramProfile::new("quiet-tool")
        .with_started_marker("user@host")
        .with_stall_threshold(Duration::from_millis(150));
    let options = fast_options().with_strategy(ClassifierStrategy::strict(Arc::new(profile)));

    let session = manager.create_session("bash", options).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), SessionState::Running);

    let outcome = session.wait_until_ready(WAIT).await.unwrap();
    assert_eq!(outcome.reason, WaitReason::Ready);
    assert_eq!(session.snapshot().prompt_rule.as_deref(), Some("stall"));
}

#[tokio::test]
async fn test_output_stream_ends_on_close() {
    let (manager, _) = connected_manager().await;
    let shell = manager.create_session("", fast_options()).await.unwrap();
    shell.wait_until_ready(WAIT).await.unwrap();

    let mut stream = Box::pin(shell.output_stream());
    shell.send_line("echo streamed").await.unwrap();

    let mut seen = String::new();
    while !seen.ends_with("$ ") {
        let event = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap();
        assert_eq!(event.stream, OutputStream::Stdout);
        seen.push_str(&event.text);
    }
    assert!(seen.contains("streamed\n"));

    shell.close().await.unwrap();
    let end = tokio::time::timeout(WAIT, async {
        while stream.next().await.is_some() {}
    })
    .await;
    assert!(end.is_ok());
}

#[tokio::test]
async fn test_login_shell_needs_pty() {
    let (manager, _) = connected_manager().await;
    let err = manager
        .create_session("", fast_options().without_pty())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParams { .. }));
}

#[tokio::test]
async fn test_dropped_channel_fails_pending_wait() {
    let (manager, _) = connected_manager().await;
    let shell = manager.create_session("", fast_options()).await.unwrap();
    shell.wait_until_ready(WAIT).await.unwrap();

    let err = shell.write_and_wait("drop\n", WAIT).await.unwrap_err();
    match err {
        Error::Stream { message, .. } => assert!(message.contains("connection reset")),
        other => panic!("unexpected error: {other}"),
    }
    let snapshot = shell.snapshot();
    assert_eq!(snapshot.state, SessionState::Closed);
    assert!(snapshot.error.is_some());
    assert!(manager.sessions().get(shell.id()).is_none());
}

#[tokio::test]
async fn test_stderr_first_does_not_end_wait_early() {
    let (manager, _) = connected_manager().await;
    let shell = manager.create_session("", fast_options()).await.unwrap();
    shell.wait_until_ready(WAIT).await.unwrap();
    shell.take_new_output();

    let outcome = shell.write_and_wait("warn\n", WAIT).await.unwrap();
    assert_eq!(outcome.reason, WaitReason::Ready);
    let new = shell.take_new_output();
    assert_eq!(new.stdout, "warn\ndone\nuser@host:~$ ");
    assert_eq!(new.stderr, "warning: low disk space\n");
}
