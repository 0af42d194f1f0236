//! The shared connection and everything that runs over it.
//!
//! [`ConnectionManager`] holds at most one authenticated SSH connection and
//! multiplexes one-shot commands and interactive sessions onto it.
//!
//! ```rust,no_run
//! use rexsh::{ConnectOptions, ConnectionManager, ExecOptions, SessionOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), rexsh::Error> {
//! let options = ConnectOptions::builder("192.168.56.101")
//!     .username("kali")
//!     .password("kali")
//!     .build()?;
//!
//! let manager = ConnectionManager::new();
//! manager.connect(&options).await?;
//!
//! let output = manager.execute_command("id", &ExecOptions::default()).await?;
//! println!("{}", output.stdout);
//!
//! let session = manager.create_session("python3", SessionOptions::default()).await?;
//! session.wait_until_ready(Duration::from_secs(10)).await?;
//!
//! manager.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod exec;
mod options;

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

pub use exec::{
    DEFAULT_EXEC_TIMEOUT, ExecOptions, ExecOutput, TIMEOUT_STDERR, TIMEOUT_STDOUT, shell_quote,
};
pub use options::{
    ConnectOptions, ConnectOptionsBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEPALIVE,
    DEFAULT_PORT, ManagerConfig,
};

use crate::broadcast::Broadcaster;
use crate::channel::ClassifierStrategy;
use crate::error::{Error, Result, SessionError};
use crate::profile::ProfileRegistry;
use crate::session::{Session, SessionOptions, SessionRegistry, SessionSnapshot};
use crate::transport::{ByteStream, Connector, PtyOptions, SshConfig, SshConnector, Transport};

struct Connection {
    config: SshConfig,
    terminal: PtyOptions,
    transport: Arc<dyn Transport>,
}

/// Owner of the shared SSH connection, its sessions and program profiles.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    connection: Mutex<Option<Connection>>,
    sessions: SessionRegistry,
    profiles: ProfileRegistry,
    config: ManagerConfig,
}

impl ConnectionManager {
    /// A manager that connects over SSH.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(SshConnector))
    }

    /// A manager that connects through `connector`.
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connection: Mutex::new(None),
            sessions: SessionRegistry::new(),
            profiles: ProfileRegistry::builtin().clone(),
            config: ManagerConfig::default(),
        }
    }

    /// Replace the manager defaults.
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Report session activity to `broadcaster`.
    ///
    /// Only sessions created afterwards are reported.
    pub fn with_broadcaster(mut self, broadcaster: Broadcaster) -> Self {
        self.sessions = SessionRegistry::with_broadcaster(broadcaster);
        self
    }

    /// Replace the program profiles used for strict-mode detection.
    pub fn with_profiles(mut self, profiles: ProfileRegistry) -> Self {
        self.profiles = profiles;
        self
    }

    /// Live interactive sessions.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Program profiles.
    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    /// Manager defaults.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Establish the shared connection.
    ///
    /// A no-op while a live connection exists. A connection that has died
    /// is replaced, and the sessions that ran on it are closed first.
    pub async fn connect(&self, options: &ConnectOptions) -> Result<()> {
        let config = options.ssh_config().clone();

        let mut connection = self.connection.lock().await;
        if let Some(existing) = connection.as_ref() {
            if existing.transport.is_alive() {
                debug!("already connected to {}", existing.config.socket_addr());
                return Ok(());
            }
            warn!(
                "connection to {} was lost, reconnecting",
                existing.config.socket_addr()
            );
            *connection = None;
            self.sessions.close_all().await;
        }

        info!(
            "connecting to {} as {}",
            config.socket_addr(),
            config.username
        );
        let transport = self
            .connector
            .connect(&config)
            .await
            .map_err(|e| Error::connection(&config.host, config.port, e))?;
        info!("connected to {}", config.socket_addr());

        *connection = Some(Connection {
            config,
            terminal: options.terminal().clone(),
            transport,
        });
        Ok(())
    }

    /// Whether a live connection exists.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.transport.is_alive())
    }

    async fn transport(&self) -> Result<(Arc<dyn Transport>, PtyOptions)> {
        match self.connection.lock().await.as_ref() {
            Some(connection) => Ok((
                Arc::clone(&connection.transport),
                connection.terminal.clone(),
            )),
            None => Err(Error::configuration("not connected; call connect() first")),
        }
    }

    /// Run `command` to completion on its own channel.
    ///
    /// The time limit covers opening the channel as well as running the
    /// command. If it passes first the channel is abandoned and a result
    /// with `timed_out` set is returned instead of an error.
    pub async fn execute_command(&self, command: &str, options: &ExecOptions) -> Result<ExecOutput> {
        let remote = exec::build_remote_command(command, options)?;
        let (transport, _) = self.transport().await?;
        let timeout = options.timeout.unwrap_or(self.config.exec_timeout);

        debug!("exec: {}", remote);
        let mut stream: Option<Box<dyn ByteStream>> = None;
        let run = async {
            let opened = transport.exec(&remote, None).await?;
            exec::collect(&mut **stream.insert(opened)).await
        };
        let collected = tokio::time::timeout(timeout, run).await;

        match collected {
            Ok(result) => {
                let output = result?;
                debug!(
                    "command {:?} finished with status {:?}",
                    command, output.exit_status
                );
                Ok(output)
            }
            Err(_) => {
                warn!(
                    "command {:?} exceeded {:?}, abandoning channel",
                    command, timeout
                );
                if let Some(mut stream) = stream {
                    tokio::spawn(async move {
                        if let Err(e) = stream.end().await {
                            debug!("closing timed out channel: {}", e);
                        }
                    });
                }
                Ok(ExecOutput::timed_out())
            }
        }
    }

    /// Pick the classifier strategy for `command`.
    ///
    /// `program` names a profile (or one of its executables) explicitly;
    /// otherwise the profiles' detection rules decide, falling back to the
    /// generic rules.
    pub fn strategy_for(&self, command: &str, program: Option<&str>) -> Result<ClassifierStrategy> {
        if let Some(hint) = program.filter(|p| !p.trim().is_empty()) {
            return self
                .profiles
                .resolve(hint)
                .map(|profile| ClassifierStrategy::strict(Arc::clone(profile)))
                .ok_or_else(|| {
                    Error::invalid_params(format!("unknown program profile '{}'", hint))
                });
        }
        Ok(self
            .profiles
            .detect(command)
            .map(|profile| ClassifierStrategy::strict(Arc::clone(profile)))
            .unwrap_or_default())
    }

    /// Start an interactive session running `command`.
    ///
    /// An empty command starts the login shell. Sessions without their own
    /// terminal size use the connection's.
    pub async fn create_session(&self, command: &str, mut options: SessionOptions) -> Result<Session> {
        let (transport, terminal) = self.transport().await?;
        if options.terminal.is_none() {
            options.terminal = Some(terminal);
        }
        let strategy = match options.strategy.clone() {
            Some(strategy) => strategy,
            None => self.strategy_for(command, None)?,
        };
        self.sessions
            .create(transport.as_ref(), command, strategy, &options)
            .await
    }

    /// Look up a live session.
    pub fn session(&self, id: &str) -> Result<Session> {
        self.sessions.require(id)
    }

    /// Close a live session and return its final snapshot.
    pub async fn close_session(&self, id: &str) -> Result<SessionSnapshot> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| Error::Session(SessionError::NotFound { id: id.to_string() }))?;
        session.close().await
    }

    /// Close every session, then the connection. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let closed = self.sessions.close_all().await;
        if closed > 0 {
            info!("closed {} sessions", closed);
        }

        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            info!("disconnecting from {}", connection.config.socket_addr());
            connection.transport.disconnect().await?;
        }
        Ok(())
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
