//! The interactive session handle and its channel task.
//!
//! Each session owns one channel. A background task is the only reader and
//! writer of that channel: it applies output to the session state, forwards
//! writes from callers, and runs the periodic stall check. Callers hold a
//! cheap, cloneable [`Session`] handle.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use futures_core::Stream;
use log::{debug, info, trace, warn};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use super::state::{
    NewOutput, OutputCursor, OutputEvent, OutputStream, SessionSnapshot, SessionState,
    WaitOutcome, WaitReason,
};
use super::timer::StallTimer;
use super::wait::{PendingWait, Resolution};
use crate::broadcast::Broadcaster;
use crate::channel::{Classifier, OutputBuffer, Sanitizer, Verdict};
use crate::error::{Error, Result, SessionError};
use crate::transport::{ByteStream, StreamEvent};

/// Output events buffered per subscriber before it starts lagging.
const OUTPUT_EVENT_CAPACITY: usize = 256;

/// How long `close` waits for the channel task before finalizing itself.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

pub(crate) type OnClosed = Box<dyn FnOnce() + Send>;

enum Command {
    Write {
        data: Vec<u8>,
        ack: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// How the channel task ended.
enum Finish {
    Eof,
    Closed,
    Failed(String),
}

struct Inner {
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    stdout_sanitizer: Sanitizer,
    stderr_sanitizer: Sanitizer,
    classifier: Classifier,
    verdict: Verdict,
    closed: bool,
    last_output: Instant,
    exit_status: Option<u32>,
    error: Option<String>,
    pending: Option<PendingWait>,
    next_wait_id: u64,
    read_cursor: OutputCursor,
}

impl Inner {
    fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.verdict.is_waiting() {
            SessionState::WaitingForInput
        } else {
            SessionState::Running
        }
    }

    /// Re-run the classifier. Returns the new state if the verdict flipped.
    fn reclassify(&mut self) -> Option<SessionState> {
        let verdict = self
            .classifier
            .classify(self.stdout.as_str(), self.last_output.elapsed());
        let flipped = verdict.is_waiting() != self.verdict.is_waiting();
        self.verdict = verdict;
        flipped.then(|| self.state())
    }

    fn output_since(&self, cursor: OutputCursor) -> (NewOutput, OutputCursor) {
        let (stdout, stdout_end) = self.stdout.since(cursor.stdout);
        let (stderr, stderr_end) = self.stderr.since(cursor.stderr);
        (
            NewOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
            OutputCursor {
                stdout: stdout_end,
                stderr: stderr_end,
            },
        )
    }
}

struct Shared {
    id: String,
    command: String,
    program: Option<String>,
    created_at: SystemTime,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    output_tx: Mutex<Option<broadcast::Sender<OutputEvent>>>,
    commands: mpsc::UnboundedSender<Command>,
    on_closed: Mutex<Option<OnClosed>>,
    broadcaster: Broadcaster,
}

impl Shared {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    fn on_output(&self, stream: OutputStream, chunk: &[u8]) {
        let (text, flipped, pending) = {
            let mut inner = self.inner();
            if inner.closed {
                return;
            }
            let text = match stream {
                OutputStream::Stdout => inner.stdout_sanitizer.sanitize(chunk),
                OutputStream::Stderr => inner.stderr_sanitizer.sanitize(chunk),
            };
            match stream {
                OutputStream::Stdout => inner.stdout.push_str(&text),
                OutputStream::Stderr => inner.stderr.push_str(&text),
            }
            inner.last_output = Instant::now();
            let flipped = inner.reclassify();
            let pending = match flipped {
                Some(SessionState::WaitingForInput) => inner.pending.take(),
                _ => None,
            };
            (text, flipped, pending)
        };

        if let Some(state) = flipped {
            self.publish_state(state);
        }
        if let Some(pending) = pending {
            pending.resolve(Resolution::Ready);
        }
        if !text.is_empty() {
            trace!("{} {:?}: {:?}", self.id, stream, text);
            if let Some(tx) = lock(&self.output_tx).as_ref() {
                let _ = tx.send(OutputEvent {
                    stream,
                    text: text.clone(),
                });
            }
            self.broadcaster.output(&self.id, &text);
        }
    }

    fn on_stall_tick(&self) {
        let (flipped, pending) = {
            let mut inner = self.inner();
            if inner.closed || inner.verdict.is_waiting() {
                return;
            }
            let flipped = inner.reclassify();
            let pending = match flipped {
                Some(SessionState::WaitingForInput) => inner.pending.take(),
                _ => None,
            };
            (flipped, pending)
        };

        if let Some(state) = flipped {
            self.publish_state(state);
        }
        if let Some(pending) = pending {
            pending.resolve(Resolution::Ready);
        }
    }

    fn publish_state(&self, state: SessionState) {
        debug!("session {} is now {}", self.id, state);
        self.state_tx.send_replace(state);
    }

    /// Move to CLOSED. Idempotent.
    fn finish(&self, finish: Finish) {
        let (pending, resolution) = {
            let mut inner = self.inner();
            if inner.closed {
                return;
            }
            inner.closed = true;
            let resolution = match finish {
                Finish::Failed(message) => {
                    inner.error = Some(message.clone());
                    Resolution::Failed(message)
                }
                Finish::Eof | Finish::Closed => Resolution::Closed,
            };
            (inner.pending.take(), resolution)
        };

        // Deregister before anyone can observe CLOSED.
        if let Some(on_closed) = lock(&self.on_closed).take() {
            on_closed();
        }
        self.publish_state(SessionState::Closed);
        if let Some(pending) = pending {
            pending.resolve(resolution);
        }
        lock(&self.output_tx).take();
        self.broadcaster.session_ended(&self.id);
        info!("session {} closed", self.id);
    }
}

/// Channel task: sole owner of the session's byte stream.
async fn run(
    shared: Arc<Shared>,
    mut stream: Box<dyn ByteStream>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    stall_interval: Duration,
) {
    let mut timer = StallTimer::new(stall_interval);

    let finish = loop {
        tokio::select! {
            event = stream.next_event() => match event {
                Some(StreamEvent::Data(data)) => shared.on_output(OutputStream::Stdout, &data),
                Some(StreamEvent::ExtendedData(data)) => {
                    shared.on_output(OutputStream::Stderr, &data)
                }
                Some(StreamEvent::ExitStatus(code)) => {
                    debug!("session {} exit status {}", shared.id, code);
                    shared.inner().exit_status = Some(code);
                }
                Some(StreamEvent::Eof) => debug!("session {} received EOF", shared.id),
                Some(StreamEvent::Closed) | None => break Finish::Eof,
                Some(StreamEvent::Error(message)) => {
                    warn!("session {} channel failed: {}", shared.id, message);
                    break Finish::Failed(message);
                }
            },
            command = commands.recv() => match command {
                Some(Command::Write { data, ack }) => match stream.write(&data).await {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                    }
                    Err(e) => {
                        let message = e.to_string();
                        warn!("session {} write failed: {}", shared.id, message);
                        let _ = ack.send(Err(Error::Stream {
                            session_id: shared.id.clone(),
                            message: message.clone(),
                        }));
                        break Finish::Failed(message);
                    }
                },
                Some(Command::Close) | None => {
                    if let Err(e) = stream.end().await {
                        debug!("session {} channel close: {}", shared.id, e);
                    }
                    break Finish::Closed;
                }
            },
            _ = timer.tick() => shared.on_stall_tick(),
        }
    };

    timer.cancel();
    shared.finish(finish);
}

/// A spawned-but-not-started session: the registry inserts the handle
/// before the channel task may observe EOF and deregister it.
pub(crate) struct Starter {
    shared: Arc<Shared>,
    stream: Box<dyn ByteStream>,
    commands: mpsc::UnboundedReceiver<Command>,
    stall_interval: Duration,
}

impl Starter {
    pub(crate) fn start(self) {
        self.shared
            .broadcaster
            .session_started(&self.shared.id, &self.shared.command);
        tokio::spawn(run(
            self.shared,
            self.stream,
            self.commands,
            self.stall_interval,
        ));
    }
}

/// Everything needed to build a session around an open channel.
pub(crate) struct SessionParts {
    pub id: String,
    pub command: String,
    pub stream: Box<dyn ByteStream>,
    pub classifier: Classifier,
    pub stall_interval: Duration,
    pub broadcaster: Broadcaster,
    pub on_closed: OnClosed,
}

/// Handle to one interactive session.
///
/// Clones share the same session. Output is accumulated for the whole
/// session lifetime and exposed as full transcripts, incremental reads, or
/// a live event stream.
///
/// # Example
///
/// ```rust,no_run
/// # use std::time::Duration;
/// # async fn example(session: rexsh::Session) -> Result<(), rexsh::Error> {
/// let outcome = session.wait_until_ready(Duration::from_secs(5)).await?;
/// if outcome.waiting_for_input() {
///     session
///         .write_and_wait("print(1 + 1)\n", Duration::from_secs(5))
///         .await?;
///     print!("{}", session.take_new_output().stdout);
/// }
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub(crate) fn new(parts: SessionParts) -> (Self, Starter) {
        let program = parts.classifier.strategy().program().map(str::to_string);
        let (state_tx, _) = watch::channel(SessionState::Running);
        let (output_tx, _) = broadcast::channel(OUTPUT_EVENT_CAPACITY);
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let inner = Inner {
            stdout: OutputBuffer::new(),
            stderr: OutputBuffer::new(),
            stdout_sanitizer: Sanitizer::new(),
            stderr_sanitizer: Sanitizer::new(),
            classifier: parts.classifier,
            verdict: Verdict::NotWaiting,
            closed: false,
            last_output: Instant::now(),
            exit_status: None,
            error: None,
            pending: None,
            next_wait_id: 0,
            read_cursor: OutputCursor::default(),
        };

        let shared = Arc::new(Shared {
            id: parts.id,
            command: parts.command,
            program,
            created_at: SystemTime::now(),
            inner: Mutex::new(inner),
            state_tx,
            output_tx: Mutex::new(Some(output_tx)),
            commands,
            on_closed: Mutex::new(Some(parts.on_closed)),
            broadcaster: parts.broadcaster,
        });

        let starter = Starter {
            shared: Arc::clone(&shared),
            stream: parts.stream,
            commands: commands_rx,
            stall_interval: parts.stall_interval,
        };
        (Self { shared }, starter)
    }

    /// The session id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The command the session was started with. Empty for a login shell.
    pub fn command(&self) -> &str {
        &self.shared.command
    }

    /// Strict-mode target program, if any.
    pub fn program(&self) -> Option<&str> {
        self.shared.program.as_deref()
    }

    /// When the session was created.
    pub fn created_at(&self) -> SystemTime {
        self.shared.created_at
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.inner().state()
    }

    /// Whether the session has closed.
    pub fn is_closed(&self) -> bool {
        self.shared.inner().closed
    }

    /// Point-in-time view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.inner();
        let prompt_rule = match &inner.verdict {
            Verdict::Prompt { rule, .. } => Some(rule.clone()),
            Verdict::Stalled => Some("stall".to_string()),
            Verdict::NotWaiting => None,
        };
        SessionSnapshot {
            id: self.shared.id.clone(),
            command: self.shared.command.clone(),
            state: inner.state(),
            program: self.shared.program.clone(),
            prompt_rule,
            stdout_len: inner.stdout.len(),
            stderr_len: inner.stderr.len(),
            exit_status: inner.exit_status,
            error: inner.error.clone(),
            quiet_for: inner.last_output.elapsed(),
        }
    }

    /// Full sanitized stdout transcript.
    pub fn stdout(&self) -> String {
        self.shared.inner().stdout.as_str().to_string()
    }

    /// Full sanitized stderr transcript.
    pub fn stderr(&self) -> String {
        self.shared.inner().stderr.as_str().to_string()
    }

    /// Remote exit status, once reported.
    pub fn exit_status(&self) -> Option<u32> {
        self.shared.inner().exit_status
    }

    /// Output appended since the previous call. The first call returns
    /// everything so far.
    pub fn take_new_output(&self) -> NewOutput {
        let mut inner = self.shared.inner();
        let (output, cursor) = inner.output_since(inner.read_cursor);
        inner.read_cursor = cursor;
        output
    }

    /// Output appended since `cursor`, and the cursor to resume from.
    pub fn output_since(&self, cursor: OutputCursor) -> (NewOutput, OutputCursor) {
        self.shared.inner().output_since(cursor)
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Receive output chunks as they arrive.
    ///
    /// The receiver reports closed once the session has closed. A receiver
    /// subscribed after close is closed immediately.
    pub fn subscribe_output(&self) -> broadcast::Receiver<OutputEvent> {
        match lock(&self.shared.output_tx).as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        }
    }

    /// Output chunks as a stream that ends when the session closes.
    ///
    /// A slow consumer skips chunks rather than stalling the session; the
    /// full transcript stays available through [`stdout`](Self::stdout).
    pub fn output_stream(&self) -> impl Stream<Item = OutputEvent> + Send + 'static {
        let rx = self.subscribe_output();
        let id = self.shared.id.clone();
        futures_util::stream::unfold(rx, move |mut rx| {
            let id = id.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => return Some((event, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("session {} output stream skipped {} chunks", id, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
    }

    /// Send raw bytes to the process.
    pub async fn write(&self, data: impl AsRef<[u8]>) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let (ack, ack_rx) = oneshot::channel();
        self.shared
            .commands
            .send(Command::Write {
                data: data.as_ref().to_vec(),
                ack,
            })
            .map_err(|_| self.closed_error())?;
        ack_rx.await.map_err(|_| self.closed_error())?
    }

    /// Send `line` followed by a newline.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write(data).await
    }

    /// Wait until the process is waiting for input, the session closes, or
    /// `max_wait` elapses, whichever comes first.
    ///
    /// Returns at once if the session is already waiting or closed.
    /// Concurrent callers join the same pending wait. A channel failure
    /// during the wait surfaces as [`Error::Stream`].
    pub async fn wait_until_ready(&self, max_wait: Duration) -> Result<WaitOutcome> {
        let deadline = Instant::now() + max_wait;

        let mut ticket = {
            let mut inner = self.shared.inner();
            match inner.state() {
                SessionState::Closed => {
                    return Ok(WaitOutcome {
                        state: SessionState::Closed,
                        reason: WaitReason::Closed,
                    });
                }
                SessionState::WaitingForInput => {
                    return Ok(WaitOutcome {
                        state: SessionState::WaitingForInput,
                        reason: WaitReason::Ready,
                    });
                }
                SessionState::Running => {}
            }

            if inner
                .pending
                .as_ref()
                .is_some_and(|p| p.is_expired(Instant::now()))
            {
                if let Some(stale) = inner.pending.take() {
                    stale.resolve(Resolution::Deadline);
                }
            }

            match inner.pending.as_ref() {
                Some(pending) => pending.subscribe(),
                None => {
                    let id = inner.next_wait_id;
                    inner.next_wait_id += 1;
                    let pending = PendingWait::new(id, deadline);
                    let ticket = pending.subscribe();
                    inner.pending = Some(pending);
                    ticket
                }
            }
        };

        let resolution = match tokio::time::timeout_at(deadline, ticket.resolved()).await {
            Ok(resolution) => resolution,
            Err(_) => {
                let mut inner = self.shared.inner();
                let owns_expired = inner
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.id() == ticket.id() && p.is_expired(Instant::now()));
                if owns_expired {
                    if let Some(pending) = inner.pending.take() {
                        pending.resolve(Resolution::Deadline);
                    }
                }
                Resolution::Deadline
            }
        };

        let reason = match resolution {
            Resolution::Ready => WaitReason::Ready,
            Resolution::Closed => WaitReason::Closed,
            Resolution::Deadline => WaitReason::Deadline,
            Resolution::Failed(message) => {
                return Err(Error::Stream {
                    session_id: self.shared.id.clone(),
                    message,
                });
            }
        };
        Ok(WaitOutcome {
            state: self.state(),
            reason,
        })
    }

    /// Write `data`, then wait for the process to answer and become ready.
    ///
    /// The prompt seen before the write is stale until new output arrives,
    /// so the readiness wait starts only after the first stdout chunk (or
    /// once `max_wait` is spent).
    pub async fn write_and_wait(
        &self,
        data: impl AsRef<[u8]>,
        max_wait: Duration,
    ) -> Result<WaitOutcome> {
        let deadline = Instant::now() + max_wait;
        let mut output = self.subscribe_output();
        self.write(data).await?;
        // Stderr alone leaves the old prompt at the end of stdout.
        while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, output.recv()).await {
            if event.stream == OutputStream::Stdout {
                break;
            }
        }
        self.wait_until_ready(deadline.saturating_duration_since(Instant::now()))
            .await
    }

    /// Close the channel and wait for the session to reach CLOSED.
    ///
    /// Idempotent. Returns the final snapshot.
    pub async fn close(&self) -> Result<SessionSnapshot> {
        if !self.is_closed() {
            let _ = self.shared.commands.send(Command::Close);
            let mut state = self.subscribe_state();
            let closed = tokio::time::timeout(CLOSE_GRACE, state.wait_for(|s| s.is_closed()));
            if closed.await.is_err() {
                warn!(
                    "session {} channel task did not finish, closing anyway",
                    self.shared.id
                );
                self.shared.finish(Finish::Closed);
            }
        }
        Ok(self.snapshot())
    }

    fn closed_error(&self) -> Error {
        Error::Session(SessionError::Closed {
            id: self.shared.id.clone(),
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("command", &self.shared.command)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
