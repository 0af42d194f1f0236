//! Best-effort telemetry of session activity.
//!
//! Sessions report start, output and end to a [`Broadcaster`], which hands
//! the events to an [`OutputSink`] on a background task. Delivery is in
//! order, fire-and-forget, and never blocks or fails a session; sink errors
//! are logged and dropped.
//!
//! ```rust,no_run
//! # async fn example() {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rexsh::broadcast::{Broadcaster, BufferedSink, HttpViewerSink};
//!
//! let viewer = Arc::new(HttpViewerSink::new("http://localhost:3000"));
//! let sink = BufferedSink::new(viewer, Duration::from_millis(500));
//! let broadcaster = Broadcaster::spawn(Arc::new(sink));
//! broadcaster.session_started("session_1", "ls -la");
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::SinkError;

/// Timeout for each viewer request.
pub const VIEWER_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the viewer health check.
pub const VIEWER_HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Default quiet interval before buffered output is flushed.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(500);

/// Receiver of session telemetry.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// A session started running `command`.
    async fn notify_session_start(&self, session_id: &str, command: &str)
    -> Result<(), SinkError>;

    /// New sanitized output. `is_complete` marks the last push of a session.
    async fn push_output(
        &self,
        session_id: &str,
        output: &str,
        is_complete: bool,
    ) -> Result<(), SinkError>;

    /// The session closed.
    async fn notify_session_end(&self, session_id: &str) -> Result<(), SinkError>;
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl OutputSink for NoopSink {
    async fn notify_session_start(&self, _: &str, _: &str) -> Result<(), SinkError> {
        Ok(())
    }

    async fn push_output(&self, _: &str, _: &str, _: bool) -> Result<(), SinkError> {
        Ok(())
    }

    async fn notify_session_end(&self, _: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartBody<'a> {
    session_id: &'a str,
    command: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputBody<'a> {
    session_id: &'a str,
    output: &'a str,
    is_complete: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EndBody<'a> {
    session_id: &'a str,
}

/// Sink that POSTs JSON to a live session viewer.
///
/// Endpoints are `/api/session/start`, `/api/session/output` and
/// `/api/session/end` under the base URL. Output for a session the viewer
/// was never told about is dropped.
#[derive(Debug)]
pub struct HttpViewerSink {
    base_url: String,
    client: Client,
    active: Mutex<HashSet<String>>,
}

impl HttpViewerSink {
    /// Create a sink for the viewer at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(VIEWER_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// The viewer's base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the viewer answers `GET /api/sessions` within a few seconds.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/api/sessions", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(VIEWER_HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("viewer health check failed: {}", e);
                false
            }
        }
    }

    /// Whether the sink is tracking `session_id`.
    pub fn is_active(&self, session_id: &str) -> bool {
        lock(&self.active).contains(session_id)
    }

    async fn post<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<(), SinkError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OutputSink for HttpViewerSink {
    async fn notify_session_start(
        &self,
        session_id: &str,
        command: &str,
    ) -> Result<(), SinkError> {
        lock(&self.active).insert(session_id.to_string());
        self.post(
            "/api/session/start",
            &StartBody {
                session_id,
                command,
            },
        )
        .await
    }

    async fn push_output(
        &self,
        session_id: &str,
        output: &str,
        is_complete: bool,
    ) -> Result<(), SinkError> {
        if !self.is_active(session_id) {
            return Ok(());
        }
        self.post(
            "/api/session/output",
            &OutputBody {
                session_id,
                output,
                is_complete,
            },
        )
        .await
    }

    async fn notify_session_end(&self, session_id: &str) -> Result<(), SinkError> {
        if !lock(&self.active).remove(session_id) {
            return Ok(());
        }
        self.post("/api/session/end", &EndBody { session_id }).await
    }
}

#[derive(Debug, Default)]
struct Pending {
    text: String,
    /// Flush once no output has arrived by then.
    due: Option<Instant>,
    /// A flush task is running for this session.
    timer: bool,
}

struct Buffers {
    inner: Arc<dyn OutputSink>,
    pending: Mutex<HashMap<String, Pending>>,
    /// Held across taking buffered text and handing it to `inner`, so a
    /// timed flush cannot overtake or trail the final push of a session.
    sending: tokio::sync::Mutex<()>,
}

impl Buffers {
    fn take(&self, session_id: &str) -> Option<String> {
        lock(&self.pending)
            .remove(session_id)
            .map(|p| p.text)
            .filter(|text| !text.is_empty())
    }
}

/// Coalesces output pushes until a session has been quiet for `delay`.
///
/// Each session with buffered output has at most one flush task.
pub struct BufferedSink {
    buffers: Arc<Buffers>,
    delay: Duration,
}

impl BufferedSink {
    /// Wrap `inner`, flushing after `delay` without new output.
    pub fn new(inner: Arc<dyn OutputSink>, delay: Duration) -> Self {
        Self {
            buffers: Arc::new(Buffers {
                inner,
                pending: Mutex::new(HashMap::new()),
                sending: tokio::sync::Mutex::new(()),
            }),
            delay,
        }
    }

    /// Push buffered text for `session_id` ahead of a final event.
    async fn drain(&self, session_id: &str) -> Result<tokio::sync::MutexGuard<'_, ()>, SinkError> {
        let sending = self.buffers.sending.lock().await;
        if let Some(text) = self.buffers.take(session_id) {
            self.buffers.inner.push_output(session_id, &text, false).await?;
        }
        Ok(sending)
    }
}

async fn flush_when_quiet(buffers: Arc<Buffers>, session_id: String) {
    loop {
        let due = match lock(&buffers.pending).get(&session_id).and_then(|p| p.due) {
            Some(due) => due,
            None => return,
        };
        tokio::time::sleep_until(due).await;

        let _sending = buffers.sending.lock().await;
        let quiet = lock(&buffers.pending)
            .get(&session_id)
            .and_then(|p| p.due)
            .map(|due| due <= Instant::now());
        match quiet {
            Some(true) => {
                if let Some(text) = buffers.take(&session_id) {
                    if let Err(e) = buffers.inner.push_output(&session_id, &text, false).await {
                        warn!("failed to flush output for {}: {}", session_id, e);
                    }
                }
                return;
            }
            Some(false) => continue,
            // Already drained by the session's final push.
            None => return,
        }
    }
}

#[async_trait]
impl OutputSink for BufferedSink {
    async fn notify_session_start(
        &self,
        session_id: &str,
        command: &str,
    ) -> Result<(), SinkError> {
        self.buffers.inner.notify_session_start(session_id, command).await
    }

    async fn push_output(
        &self,
        session_id: &str,
        output: &str,
        is_complete: bool,
    ) -> Result<(), SinkError> {
        if is_complete {
            let _sending = self.drain(session_id).await?;
            return self.buffers.inner.push_output(session_id, output, true).await;
        }

        let start_timer = {
            let mut pending = lock(&self.buffers.pending);
            let entry = pending.entry(session_id.to_string()).or_default();
            entry.text.push_str(output);
            entry.due = Some(Instant::now() + self.delay);
            !std::mem::replace(&mut entry.timer, true)
        };
        if start_timer {
            tokio::spawn(flush_when_quiet(
                Arc::clone(&self.buffers),
                session_id.to_string(),
            ));
        }
        Ok(())
    }

    async fn notify_session_end(&self, session_id: &str) -> Result<(), SinkError> {
        let _sending = self.drain(session_id).await?;
        self.buffers.inner.notify_session_end(session_id).await
    }
}

#[derive(Debug)]
enum SinkEvent {
    Start { session_id: String, command: String },
    Output { session_id: String, text: String, complete: bool },
    End { session_id: String },
}

/// Handle sessions use to report telemetry.
///
/// Cheap to clone. A disabled broadcaster drops every event.
#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    tx: Option<mpsc::UnboundedSender<SinkEvent>>,
}

impl Broadcaster {
    /// A broadcaster that reports nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Start a delivery task feeding `sink`. Requires a Tokio runtime.
    pub fn spawn(sink: Arc<dyn OutputSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(sink, rx));
        Self { tx: Some(tx) }
    }

    /// Whether events go anywhere.
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn session_started(&self, session_id: &str, command: &str) {
        self.send(SinkEvent::Start {
            session_id: session_id.to_string(),
            command: command.to_string(),
        });
    }

    pub fn output(&self, session_id: &str, text: &str) {
        self.send(SinkEvent::Output {
            session_id: session_id.to_string(),
            text: text.to_string(),
            complete: false,
        });
    }

    /// Final output push followed by the end notification.
    pub fn session_ended(&self, session_id: &str) {
        self.send(SinkEvent::Output {
            session_id: session_id.to_string(),
            text: String::new(),
            complete: true,
        });
        self.send(SinkEvent::End {
            session_id: session_id.to_string(),
        });
    }

    fn send(&self, event: SinkEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

async fn deliver(sink: Arc<dyn OutputSink>, mut rx: mpsc::UnboundedReceiver<SinkEvent>) {
    while let Some(event) = rx.recv().await {
        let result = match &event {
            SinkEvent::Start {
                session_id,
                command,
            } => sink.notify_session_start(session_id, command).await,
            SinkEvent::Output {
                session_id,
                text,
                complete,
            } => sink.push_output(session_id, text, *complete).await,
            SinkEvent::End { session_id } => sink.notify_session_end(session_id).await,
        };
        if let Err(e) = result {
            warn!("output sink delivery failed: {}", e);
        }
    }
    debug!("output sink delivery task finished");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutputSink for Recorder {
        async fn notify_session_start(&self, id: &str, command: &str) -> Result<(), SinkError> {
            self.calls.lock().unwrap().push(format!("start {} {}", id, command));
            Ok(())
        }

        async fn push_output(&self, id: &str, output: &str, done: bool) -> Result<(), SinkError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("output {} {:?} {}", id, output, done));
            Ok(())
        }

        async fn notify_session_end(&self, id: &str) -> Result<(), SinkError> {
            self.calls.lock().unwrap().push(format!("end {}", id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_broadcaster_delivers_in_order() {
        let recorder = Arc::new(Recorder::default());
        let broadcaster = Broadcaster::spawn(recorder.clone());

        broadcaster.session_started("s1", "ls");
        broadcaster.output("s1", "a\n");
        broadcaster.session_ended("s1");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            recorder.calls(),
            vec![
                "start s1 ls".to_string(),
                "output s1 \"a\\n\" false".to_string(),
                "output s1 \"\" true".to_string(),
                "end s1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_disabled_broadcaster_is_silent() {
        let broadcaster = Broadcaster::disabled();
        assert!(!broadcaster.is_enabled());
        broadcaster.output("s1", "ignored");
    }

    #[tokio::test]
    async fn test_buffered_sink_coalesces_bursts() {
        let recorder = Arc::new(Recorder::default());
        let sink = BufferedSink::new(recorder.clone(), Duration::from_millis(30));

        sink.push_output("s1", "a", false).await.unwrap();
        sink.push_output("s1", "b", false).await.unwrap();
        sink.push_output("s1", "c", false).await.unwrap();
        assert!(recorder.calls().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(recorder.calls(), vec!["output s1 \"abc\" false".to_string()]);
    }

    #[tokio::test]
    async fn test_buffered_sink_flushes_on_end() {
        let recorder = Arc::new(Recorder::default());
        let sink = BufferedSink::new(recorder.clone(), Duration::from_secs(60));

        sink.push_output("s1", "tail", false).await.unwrap();
        sink.notify_session_end("s1").await.unwrap();

        assert_eq!(
            recorder.calls(),
            vec!["output s1 \"tail\" false".to_string(), "end s1".to_string()]
        );
    }

    /// Sink whose output pushes are slow, as over a congested network.
    struct SlowRecorder {
        recorder: Arc<Recorder>,
        latency: Duration,
    }

    #[async_trait]
    impl OutputSink for SlowRecorder {
        async fn notify_session_start(&self, id: &str, command: &str) -> Result<(), SinkError> {
            self.recorder.notify_session_start(id, command).await
        }

        async fn push_output(&self, id: &str, output: &str, done: bool) -> Result<(), SinkError> {
            tokio::time::sleep(self.latency).await;
            self.recorder.push_output(id, output, done).await
        }

        async fn notify_session_end(&self, id: &str) -> Result<(), SinkError> {
            self.recorder.notify_session_end(id).await
        }
    }

    #[tokio::test]
    async fn test_buffered_sink_end_waits_for_inflight_flush() {
        let recorder = Arc::new(Recorder::default());
        let slow = Arc::new(SlowRecorder {
            recorder: recorder.clone(),
            latency: Duration::from_millis(100),
        });
        let sink = BufferedSink::new(slow, Duration::from_millis(10));

        sink.push_output("s1", "last words", false).await.unwrap();
        // The timed flush is now in the middle of its slow push.
        tokio::time::sleep(Duration::from_millis(40)).await;
        sink.push_output("s1", "", true).await.unwrap();
        sink.notify_session_end("s1").await.unwrap();

        assert_eq!(
            recorder.calls(),
            vec![
                "output s1 \"last words\" false".to_string(),
                "output s1 \"\" true".to_string(),
                "end s1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_buffered_sink_one_flush_task_per_burst() {
        let recorder = Arc::new(Recorder::default());
        let sink = BufferedSink::new(recorder.clone(), Duration::from_millis(30));

        for chunk in ["a", "b", "c", "d"] {
            sink.push_output("s1", chunk, false).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(lock(&sink.buffers.pending)["s1"].timer);
        assert!(recorder.calls().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(recorder.calls(), vec!["output s1 \"abcd\" false".to_string()]);
        assert!(lock(&sink.buffers.pending).is_empty());
    }

    #[tokio::test]
    async fn test_viewer_drops_output_for_unknown_session() {
        let sink = HttpViewerSink::new("http://127.0.0.1:9/");
        assert_eq!(sink.base_url(), "http://127.0.0.1:9");
        assert!(sink.push_output("never-started", "x", false).await.is_ok());
        assert!(sink.notify_session_end("never-started").await.is_ok());
    }
}
