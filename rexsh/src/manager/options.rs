//! Connection options for the shared SSH connection.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{Error, Result};
use crate::session::SessionOptions;
use crate::transport::config::{AuthMethod, HostKeyVerification, PtyOptions, SshConfig};

use super::exec::DEFAULT_EXEC_TIMEOUT;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Default connect and handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default keepalive interval.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(60);

/// Validated settings for [`ConnectionManager::connect`](super::ConnectionManager::connect).
///
/// # Example
///
/// ```rust,no_run
/// use rexsh::ConnectOptions;
///
/// # fn example() -> Result<(), rexsh::Error> {
/// let options = ConnectOptions::builder("192.168.56.101")
///     .username("kali")
///     .private_key("/home/me/.ssh/id_ed25519")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    ssh: SshConfig,
    terminal: PtyOptions,
}

impl ConnectOptions {
    /// Start building options for `host`.
    pub fn builder(host: impl Into<String>) -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::new(host)
    }

    /// Transport configuration.
    pub fn ssh_config(&self) -> &SshConfig {
        &self.ssh
    }

    /// Pseudo-terminal used for sessions that do not set their own.
    pub fn terminal(&self) -> &PtyOptions {
        &self.terminal
    }

    pub fn host(&self) -> &str {
        &self.ssh.host
    }

    pub fn port(&self) -> u16 {
        self.ssh.port
    }

    pub fn username(&self) -> &str {
        &self.ssh.username
    }
}

/// Builder for [`ConnectOptions`].
///
/// Exactly one of password or private key must be set.
#[derive(Debug, Clone)]
pub struct ConnectOptionsBuilder {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<SecretString>,
    private_key: Option<(PathBuf, Option<SecretString>)>,
    timeout: Duration,
    keepalive_interval: Option<Duration>,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    terminal: PtyOptions,
}

impl ConnectOptionsBuilder {
    /// Create a builder for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            private_key: None,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive_interval: Some(DEFAULT_KEEPALIVE),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            terminal: PtyOptions::default(),
        }
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Use password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Use private key authentication.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.private_key = Some((key_path.into(), None));
        self
    }

    /// Use an encrypted private key.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.private_key = Some((
            key_path.into(),
            Some(SecretString::from(passphrase.into())),
        ));
        self
    }

    /// Set the connect and handshake timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the keepalive interval, or disable keepalives with `None`.
    pub fn keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set the host key verification mode.
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a known_hosts file other than `~/.ssh/known_hosts`.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Set terminal dimensions for interactive sessions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal.width = width;
        self.terminal.height = height;
        self
    }

    /// Validate the settings.
    pub fn build(self) -> Result<ConnectOptions> {
        if self.host.trim().is_empty() {
            return Err(Error::configuration("host is required"));
        }
        let username = self
            .username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::configuration("username is required"))?;

        let auth = match (self.password, self.private_key) {
            (Some(password), None) => AuthMethod::Password(password),
            (None, Some((path, passphrase))) => AuthMethod::PrivateKey { path, passphrase },
            (Some(_), Some(_)) => {
                return Err(Error::configuration(
                    "set either a password or a private key, not both",
                ));
            }
            (None, None) => {
                return Err(Error::configuration(
                    "a password or a private key is required",
                ));
            }
        };

        Ok(ConnectOptions {
            ssh: SshConfig {
                host: self.host,
                port: self.port,
                username,
                auth,
                timeout: self.timeout,
                keepalive_interval: self.keepalive_interval,
                host_key_verification: self.host_key_verification,
                known_hosts_path: self.known_hosts_path,
            },
            terminal: self.terminal,
        })
    }
}

/// Defaults applied by the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Time limit for one-shot commands that do not set their own.
    pub exec_timeout: Duration,

    /// Options for sessions started through the tool surface.
    pub session_defaults: SessionOptions,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            session_defaults: SessionOptions::default(),
        }
    }
}
