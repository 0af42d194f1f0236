//! In-memory transport for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use rexsh::error::TransportError;
use rexsh::transport::{ByteStream, Connector, PtyOptions, SshConfig, StreamEvent, Transport};
use rexsh::{ConnectOptions, ConnectionManager, SessionOptions};

/// Colored bash-style prompt.
pub const PROMPT: &str = "\x1b[01;32muser@host\x1b[00m:\x1b[01;34m~\x1b[00m$ ";

pub const MOTD: &str = "Linux kali 6.1.0-kali9-amd64 x86_64\r\nLast login: Mon Oct 12 09:14:02 2026\r\n";

pub const MSF_BANNER: &str = "\r\n     ##### ######   ###########\r\n    #    ####### #\r\n       =[ metasploit v6.3.4-dev ]\r\n+ -- --=[ 2294 exploits - 1201 auxiliary ]\r\n\r\nMetasploit tip: use sessions -1\r\n#\r\n";

/// What the fake remote process does with input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    /// Line-oriented shell with echo and a prompt.
    Shell,
    /// msfconsole: banner first, prompt a little later.
    Msf,
    /// Accepts input, never prints.
    Silent,
    /// Every write fails.
    Broken,
}

pub struct FakeStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    tx: mpsc::UnboundedSender<StreamEvent>,
    program: Program,
    line: String,
    ended: bool,
}

impl FakeStream {
    fn new(program: Program) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            tx,
            program,
            line: String::new(),
            ended: false,
        }
    }

    fn start(program: Program) -> Self {
        let stream = Self::new(program);
        match program {
            Program::Shell => {
                stream.out(MOTD);
                stream.out(PROMPT);
            }
            Program::Msf => {
                stream.out(MSF_BANNER);
                let tx = stream.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    let _ = tx.send(StreamEvent::Data(Bytes::from_static(b"msf6 > ")));
                });
            }
            Program::Silent | Program::Broken => {}
        }
        stream
    }

    /// A one-shot command that prints, exits and closes.
    fn finished(stdout: &str, stderr: &str, status: u32) -> Self {
        let stream = Self::new(Program::Silent);
        if !stdout.is_empty() {
            stream.out(stdout);
        }
        if !stderr.is_empty() {
            stream.err(stderr);
        }
        stream.emit(StreamEvent::ExitStatus(status));
        stream.emit(StreamEvent::Eof);
        stream.emit(StreamEvent::Closed);
        stream
    }

    fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }

    fn out(&self, text: &str) {
        self.emit(StreamEvent::Data(Bytes::copy_from_slice(text.as_bytes())));
    }

    fn err(&self, text: &str) {
        self.emit(StreamEvent::ExtendedData(Bytes::copy_from_slice(
            text.as_bytes(),
        )));
    }

    /// Send `events` after `delay`, as if the remote were slow.
    fn later(&self, delay: Duration, events: Vec<StreamEvent>) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for event in events {
                let _ = tx.send(event);
            }
        });
    }

    fn data(text: &str) -> StreamEvent {
        StreamEvent::Data(Bytes::copy_from_slice(text.as_bytes()))
    }

    fn hang_up(&mut self, status: u32) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.emit(StreamEvent::ExitStatus(status));
        self.emit(StreamEvent::Eof);
        self.emit(StreamEvent::Closed);
    }

    fn shell_line(&mut self, line: &str) {
        match line {
            // Stderr lands before the echo and the rest of the output.
            "warn" => {
                self.err("warning: low disk space\r\n");
                self.later(
                    Duration::from_millis(100),
                    vec![Self::data("warn\r\ndone\r\n"), Self::data(PROMPT)],
                );
                return;
            }
            // The connection dies while the command runs.
            "drop" => {
                self.out("drop\r\n");
                self.ended = true;
                self.later(
                    Duration::from_millis(100),
                    vec![StreamEvent::Error("connection reset by peer".to_string())],
                );
                return;
            }
            _ => {}
        }

        self.out(&format!("{}\r\n", line));
        match line.split_once(' ').unwrap_or((line, "")) {
            ("exit", _) => {
                self.out("logout\r\n");
                self.hang_up(0);
                return;
            }
            ("echo", text) => self.out(&format!("{}\r\n", text)),
            ("sleep", _) | ("cat", _) => return,
            ("", _) => {}
            (cmd, _) => self.out(&format!("bash: {}: command not found\r\n", cmd)),
        }
        self.out(PROMPT);
    }

    fn msf_line(&mut self, line: &str) {
        self.out(&format!("{}\r\n", line));
        match line {
            "exit" => {
                self.hang_up(0);
                return;
            }
            "version" => self.out("Framework: 6.3.4-dev\r\nConsole  : 6.3.4-dev\r\n"),
            _ => {}
        }
        self.out("msf6 > ");
    }
}

#[async_trait]
impl ByteStream for FakeStream {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.ended {
            return Err(TransportError::Disconnected);
        }
        match self.program {
            Program::Broken => return Err(TransportError::Disconnected),
            Program::Silent => return Ok(()),
            Program::Shell | Program::Msf => {}
        }

        self.line.push_str(&String::from_utf8_lossy(data));
        while let Some(pos) = self.line.find('\n') {
            let line: String = self.line.drain(..=pos).collect();
            let line = line.trim_end().to_string();
            match self.program {
                Program::Msf => self.msf_line(&line),
                _ => self.shell_line(&line),
            }
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<(), TransportError> {
        if !self.ended {
            self.ended = true;
            self.emit(StreamEvent::Eof);
            self.emit(StreamEvent::Closed);
        }
        Ok(())
    }
}

/// Records every channel request.
#[derive(Default)]
pub struct FakeTransport {
    commands: Mutex<Vec<String>>,
    dead: AtomicBool,
}

impl FakeTransport {
    /// Commands received by `exec`, in order. Shells are recorded as `<shell>`.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    fn record(&self, command: &str) {
        self.commands.lock().unwrap().push(command.to_string());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn exec(
        &self,
        command: &str,
        pty: Option<&PtyOptions>,
    ) -> rexsh::Result<Box<dyn ByteStream>> {
        self.record(command);
        let program = command.rsplit(" && ").next().unwrap_or(command);

        let stream = match (pty.is_some(), program.split_whitespace().next()) {
            // The channel never opens.
            (_, Some("hang")) => return std::future::pending().await,
            (_, Some("flaky")) => {
                let stream = FakeStream::new(Program::Silent);
                stream.out("partial\r\n");
                stream.emit(StreamEvent::Error("connection reset by peer".to_string()));
                stream
            }
            (true, Some("bash" | "sh")) => FakeStream::start(Program::Shell),
            (true, Some("msfconsole")) => FakeStream::start(Program::Msf),
            (true, Some("broken")) => FakeStream::start(Program::Broken),
            (_, Some("sleep" | "cat" | "tail")) => FakeStream::start(Program::Silent),
            (_, Some("false")) => FakeStream::finished("", "something went wrong\n", 1),
            (_, Some("echo")) => {
                let text = program.trim_start_matches("echo").trim();
                let text = text.trim_matches('\'');
                FakeStream::finished(&format!("\x1b[1m{}\x1b[0m\r\n", text), "", 0)
            }
            _ => FakeStream::finished("", &format!("{}: not found\n", program), 127),
        };
        Ok(Box::new(stream))
    }

    async fn shell(&self, _pty: &PtyOptions) -> rexsh::Result<Box<dyn ByteStream>> {
        self.record("<shell>");
        Ok(Box::new(FakeStream::start(Program::Shell)))
    }

    fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> rexsh::Result<()> {
        self.kill();
        Ok(())
    }
}

/// How the fake connector fails.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Refused,
    BadPassword,
}

#[derive(Default)]
pub struct FakeConnector {
    pub transport: Mutex<Option<Arc<FakeTransport>>>,
    pub connects: AtomicUsize,
    pub failure: Mutex<Option<Failure>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(failure: Failure) -> Arc<Self> {
        let connector = Self::default();
        *connector.failure.lock().unwrap() = Some(failure);
        Arc::new(connector)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The transport handed out by the latest connect.
    pub fn transport(&self) -> Arc<FakeTransport> {
        self.transport
            .lock()
            .unwrap()
            .clone()
            .expect("connect has not been called")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &SshConfig) -> Result<Arc<dyn Transport>, TransportError> {
        match *self.failure.lock().unwrap() {
            Some(Failure::Refused) => {
                return Err(TransportError::ConnectionFailed {
                    host: config.host.clone(),
                    port: config.port,
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                });
            }
            Some(Failure::BadPassword) => {
                return Err(TransportError::AuthenticationFailed {
                    user: config.username.clone(),
                });
            }
            None => {}
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(FakeTransport::default());
        *self.transport.lock().unwrap() = Some(Arc::clone(&transport));
        Ok(transport)
    }
}

pub fn connect_options() -> ConnectOptions {
    ConnectOptions::builder("fake-host")
        .port(2222)
        .username("tester")
        .password("secret")
        .build()
        .expect("valid options")
}

/// A manager wired to a fresh fake connector.
pub fn manager() -> (ConnectionManager, Arc<FakeConnector>) {
    let connector = FakeConnector::new();
    let manager = ConnectionManager::with_connector(connector.clone());
    (manager, connector)
}

/// A connected manager.
pub async fn connected_manager() -> (ConnectionManager, Arc<FakeConnector>) {
    let (manager, connector) = manager();
    manager
        .connect(&connect_options())
        .await
        .expect("fake connect succeeds");
    (manager, connector)
}

/// Session options with a fast stall check.
pub fn fast_options() -> SessionOptions {
    SessionOptions::default().with_stall_check_interval(Duration::from_millis(20))
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
